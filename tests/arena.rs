use std::{
    fs,
    sync::{atomic::Ordering, mpsc, Arc},
    thread,
};

use algo_arena::{error::ArenaError, observer::ProgressEvent, prelude::*};
use common::{iterated, quiet_config, FakeProgram, FakeRuntime, Sum};

mod common;

fn arena(runtime: &Arc<FakeRuntime>, config: Configuration, battle: BattleConfig) -> Arena<Sum> {
    Arena::new(
        Sum,
        runtime.clone(),
        config,
        ConstraintsBuilder::new().build().unwrap(),
        battle,
    )
    .unwrap()
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("team has points");
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn two_teams_share_the_points() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("Team A", FakeProgram::Generator, FakeProgram::Solver { max_size: 40 }),
        runtime.team("Team B", FakeProgram::Generator, FakeProgram::Solver { max_size: 80 }),
    ];
    let runtime = Arc::new(runtime);
    let arena = arena(&runtime, quiet_config(), iterated(100));

    let result = arena.run(teams).unwrap();
    assert_eq!(result.active, ["team_a", "team_b"]);
    assert!(result.excluded.is_empty());
    assert!(!result.interrupted);

    let a_solving = result.battle(&Matchup::new("team_b", "team_a")).unwrap();
    let b_solving = result.battle(&Matchup::new("team_a", "team_b")).unwrap();
    assert_eq!(a_solving.score(), 0.4);
    assert_eq!(b_solving.score(), 0.8);

    let points = arena.points(&result);
    assert_close(points.get("team_a"), 33.3);
    assert_close(points.get("team_b"), 66.7);
    assert!((points.total() - 100.0).abs() < 1e-9);
    assert_eq!(points.ranking()[0].0, "team_b");

    runtime.assert_clean();
}

#[test]
fn names_are_released_after_a_match() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("a", FakeProgram::Generator, FakeProgram::Solver { max_size: 3 }),
        runtime.team("b", FakeProgram::Generator, FakeProgram::Solver { max_size: 5 }),
    ];
    let runtime = Arc::new(runtime);
    let arena = arena(&runtime, quiet_config(), iterated(10));

    let first = arena.run(teams.clone()).unwrap();
    let second = arena.run(teams).unwrap();
    assert_eq!(first.battles.len(), 2);
    assert_eq!(second.battles.len(), 2);
    runtime.assert_clean();
}

#[test]
fn team_failing_to_build_is_excluded() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("a", FakeProgram::Generator, FakeProgram::Solver { max_size: 50 }),
        runtime.team("b", FakeProgram::Generator, FakeProgram::Solver { max_size: 50 }),
        runtime.team("broken", FakeProgram::BrokenBuild, FakeProgram::Solver { max_size: 50 }),
    ];
    let runtime = Arc::new(runtime);
    let arena = arena(&runtime, quiet_config(), iterated(100));

    let result = arena.run(teams).unwrap();
    assert_eq!(result.active, ["a", "b"]);
    assert!(result.excluded["broken"].contains("syntax error"));
    assert_eq!(result.battles.len(), 2);
    assert!(result
        .battles
        .keys()
        .all(|m| m.generator != "broken" && m.solver != "broken"));

    // one pair of active teams: 50 each from the tie, 100 each for the excluded team
    let points = arena.points(&result);
    assert_close(points.get("a"), 150.0);
    assert_close(points.get("b"), 150.0);
    assert_close(points.get("broken"), 0.0);

    // the solver of the broken team was built, then removed
    assert!(runtime
        .built
        .lock()
        .unwrap()
        .contains(&"algo_arena_broken_solver".to_string()));
    runtime.assert_clean();
}

#[test]
fn safe_build_gives_the_same_result() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("a", FakeProgram::Generator, FakeProgram::Solver { max_size: 40 }),
        runtime.team("b", FakeProgram::Generator, FakeProgram::Solver { max_size: 80 }),
        runtime.team("broken", FakeProgram::Generator, FakeProgram::BrokenBuild),
    ];
    let runtime = Arc::new(runtime);
    let arena = arena(
        &runtime,
        quiet_config().with_safe_build(true),
        iterated(100),
    );

    let result = arena.run(teams).unwrap();
    assert_eq!(result.active, ["a", "b"]);
    assert_eq!(result.excluded.len(), 1);
    assert_eq!(
        result.battle(&Matchup::new("a", "b")).map(Battle::score),
        Some(0.8)
    );
    runtime.assert_clean();
}

#[test]
fn parallel_battles_are_bounded() {
    for parallel in [1, 2, 3] {
        let mut runtime = FakeRuntime::new();
        let teams = ["a", "b", "c", "d"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                runtime.team(
                    name,
                    FakeProgram::Generator,
                    FakeProgram::Solver {
                        max_size: 5 * (i as u64 + 1),
                    },
                )
            })
            .collect::<Vec<_>>();
        let runtime = Arc::new(runtime);
        let arena = arena(
            &runtime,
            quiet_config().with_parallel_battles(parallel),
            iterated(30),
        );

        let result = arena.run(teams).unwrap();
        assert_eq!(result.battles.len(), 12);
        assert!(result.failed_battles.is_empty());
        assert!(runtime.max_running.load(Ordering::SeqCst) <= parallel);
        runtime.assert_clean();
    }
}

#[test]
fn panicking_battle_does_not_abort_the_match() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("a", FakeProgram::Generator, FakeProgram::Solver { max_size: 10 }),
        runtime.team("crashy", FakeProgram::Generator, FakeProgram::Panicking),
    ];
    let runtime = Arc::new(runtime);
    let arena = arena(&runtime, quiet_config(), iterated(20));

    let result = arena.run(teams).unwrap();
    assert_eq!(result.battles.len(), 1);
    assert!(result.battle(&Matchup::new("crashy", "a")).is_some());
    let failure = &result.failed_battles[&Matchup::new("a", "crashy")];
    assert!(failure.contains("fake runtime exploded"), "{failure}");

    // the pair is skipped, nobody gets its points
    let points = arena.points(&result);
    assert_close(points.get("a"), 0.0);
    assert_close(points.get("crashy"), 0.0);
    runtime.assert_clean();
}

#[test]
fn stuck_generator_gives_the_solver_every_fight() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("a", FakeProgram::Stuck, FakeProgram::Solver { max_size: 1 }),
        runtime.team("b", FakeProgram::Generator, FakeProgram::Solver { max_size: 1 }),
    ];
    let runtime = Arc::new(runtime);
    let arena = arena(&runtime, quiet_config(), iterated(50));

    let result = arena.run(teams).unwrap();
    let b_solving = result.battle(&Matchup::new("a", "b")).unwrap();
    let a_solving = result.battle(&Matchup::new("b", "a")).unwrap();
    assert_eq!(b_solving.score(), 1.0);
    assert_eq!(a_solving.score(), 1.0 / 50.0);
}

#[test]
fn lax_timeouts_accept_valid_partial_output() {
    for (strict, expected) in [(true, 0.0), (false, 1.0)] {
        let mut runtime = FakeRuntime::new();
        let teams = vec![runtime.team("slow", FakeProgram::Generator, FakeProgram::SlowSolver)];
        let runtime = Arc::new(runtime);
        let arena = arena(
            &runtime,
            quiet_config().with_strict_timeouts(strict),
            iterated(20),
        );

        let result = arena.run(teams).unwrap();
        let battle = result.battle(&Matchup::new("slow", "slow")).unwrap();
        assert_eq!(battle.score(), expected, "strict timeouts: {strict}");
    }
}

#[test]
fn single_team_gets_every_point() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![runtime.team("solo", FakeProgram::Generator, FakeProgram::Solver { max_size: 3 })];
    let runtime = Arc::new(runtime);
    let battle = BattleConfig::Averaged(
        AveragedConfig::default()
            .with_instance_size(5)
            .with_num_fights(4),
    );
    let arena = arena(&runtime, quiet_config(), battle);

    let result = arena.run(teams).unwrap();
    let Battle::Averaged(averaged) = result.battle(&Matchup::new("solo", "solo")).unwrap() else {
        panic!("expected an averaged battle");
    };
    assert_eq!(averaged.scores(), [0.0; 4]);
    assert_eq!(averaged.zero_score_fights(), 4);

    assert_close(arena.points(&result).get("solo"), 100.0);
    runtime.assert_clean();
}

#[test]
fn conflicting_names_are_rejected_before_building() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("Team A", FakeProgram::Generator, FakeProgram::Solver { max_size: 3 }),
        runtime.team("team_a", FakeProgram::Generator, FakeProgram::Solver { max_size: 3 }),
    ];
    let runtime = Arc::new(runtime);
    let arena = arena(&runtime, quiet_config(), iterated(10));

    assert_eq!(
        arena.run(teams).unwrap_err(),
        ArenaError::TeamNameConflict("team_a".to_string())
    );
    assert!(runtime.built.lock().unwrap().is_empty());
}

#[test]
fn unreachable_runtime_is_reported() {
    let runtime = Arc::new(FakeRuntime::unreachable());
    let arena = arena(&runtime, quiet_config(), iterated(10));
    assert!(matches!(
        arena.run(vec![]),
        Err(ArenaError::RuntimeUnavailable(msg)) if msg.contains("connection refused")
    ));
}

#[test]
fn invalid_configuration_is_rejected() {
    let runtime = Arc::new(FakeRuntime::new());
    let res = Arena::new(
        Sum,
        runtime.clone(),
        quiet_config().with_parallel_battles(0),
        ConstraintsBuilder::new().build().unwrap(),
        iterated(10),
    );
    assert!(matches!(res, Err(ArenaError::InvalidConfig(_))));

    let res = Arena::new(
        Sum,
        runtime,
        quiet_config(),
        ConstraintsBuilder::new().build().unwrap(),
        BattleConfig::Averaged(AveragedConfig::default().with_num_fights(0)),
    );
    assert!(matches!(res, Err(ArenaError::InvalidConfig(_))));
}

#[test]
fn cancelled_match_does_not_affect_the_next_one() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("a", FakeProgram::Generator, FakeProgram::Solver { max_size: 3 }),
        runtime.team("b", FakeProgram::Generator, FakeProgram::Solver { max_size: 3 }),
    ];
    let runtime = Arc::new(runtime);
    let arena = arena(&runtime, quiet_config(), iterated(10));
    let token = CancellationToken::new();
    token.cancel();

    let cancelled = arena.run_cancellable(teams.clone(), &token).unwrap();
    assert!(cancelled.interrupted);
    assert!(cancelled.active.is_empty());
    assert!(cancelled.excluded.is_empty());
    assert_eq!(
        cancelled.cancelled.iter().map(String::as_str).collect::<Vec<_>>(),
        ["a", "b"]
    );
    assert!(cancelled.battles.is_empty());
    assert!(arena.points(&cancelled).is_empty());
    assert_eq!(runtime.runs.load(Ordering::SeqCst), 0);

    let next = arena.run(teams).unwrap();
    assert!(!next.interrupted);
    assert!(next.cancelled.is_empty());
    assert_eq!(next.active, ["a", "b"]);
    assert_eq!(next.battles.len(), 2);
    assert_close(arena.points(&next).get("a"), 50.0);
    runtime.assert_clean();
}

#[test]
fn cancellation_stops_the_match_and_cleans_up() {
    let mut runtime = FakeRuntime::new();
    let teams = ["a", "b", "c"]
        .into_iter()
        .map(|name| runtime.team(name, FakeProgram::Generator, FakeProgram::Solver { max_size: 1_000 }))
        .collect::<Vec<_>>();
    let runtime = Arc::new(runtime);
    let (tx, rx) = mpsc::channel();
    let arena = arena(&runtime, quiet_config(), iterated(1_000)).with_observer(tx);

    let token = CancellationToken::new();
    let watcher_token = token.clone();
    let watcher = thread::spawn(move || {
        for event in rx {
            if let ProgressEvent::FightFinished { .. } = event {
                watcher_token.cancel();
            }
        }
    });

    let result = arena.run_cancellable(teams.clone(), &token).unwrap();
    assert!(result.interrupted);
    assert!(result.battles.len() < 6);
    // the interrupted battle keeps what it reached so far
    assert!(result.battles.values().all(|b| b.score() < 1.0));
    runtime.assert_clean();

    // the arena itself is not cancelled
    let rerun = arena.run(teams).unwrap();
    assert!(!rerun.interrupted);
    assert_eq!(rerun.battles.len(), 6);
    assert!(rerun.battles.values().all(|b| b.score() == 1.0));

    drop(arena);
    watcher.join().unwrap();
    runtime.assert_clean();
}

#[test]
fn observer_sees_the_whole_match() {
    let mut runtime = FakeRuntime::new();
    let teams = vec![
        runtime.team("a", FakeProgram::Generator, FakeProgram::Solver { max_size: 2 }),
        runtime.team("b", FakeProgram::Generator, FakeProgram::Solver { max_size: 4 }),
        runtime.team("c", FakeProgram::BrokenBuild, FakeProgram::Solver { max_size: 4 }),
    ];
    let runtime = Arc::new(runtime);
    let (tx, rx) = mpsc::channel();
    let arena = arena(&runtime, quiet_config(), iterated(10)).with_observer(tx);

    let result = arena.run(teams).unwrap();
    drop(arena);
    let events = rx.into_iter().collect::<Vec<_>>();

    let count = |f: fn(&ProgressEvent) -> bool| events.iter().filter(|e| f(e)).count();
    assert_eq!(count(|e| matches!(e, ProgressEvent::BuildStarted { .. })), 3);
    assert_eq!(
        count(|e| matches!(e, ProgressEvent::BuildFinished { error: Some(_), .. })),
        1
    );
    assert_eq!(count(|e| matches!(e, ProgressEvent::BattleStarted { .. })), 2);
    assert_eq!(count(|e| matches!(e, ProgressEvent::BattleFinished { result: Ok(_), .. })), 2);
    assert_eq!(
        count(|e| matches!(e, ProgressEvent::FightStarted { .. })),
        count(|e| matches!(e, ProgressEvent::FightFinished { .. }))
    );
    assert_eq!(
        count(|e| matches!(e, ProgressEvent::FightFinished { .. })),
        count(|e| matches!(e, ProgressEvent::BattleUpdated { .. }))
    );

    // snapshots carry the running round, the final battle its outcome
    let last_snapshot = events
        .iter()
        .rev()
        .find_map(|e| match e {
            ProgressEvent::BattleUpdated {
                matchup,
                battle: Battle::Iterated(battle),
            } if matchup.solver == "b" => battle.current_round().map(|round| round.solved),
            _ => None,
        });
    assert_eq!(last_snapshot, Some(4));
    let Some(Battle::Iterated(battle)) = result.battle(&Matchup::new("a", "b")) else {
        panic!("expected an iterated battle");
    };
    assert_eq!(battle.reached(), [4]);
}

#[test]
fn evaluate_runs_the_teams_of_a_directory() {
    let dir = std::env::temp_dir().join(format!("algo_arena_evaluate_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    for program in ["a/generator", "a/solver", "b/generator", "b/solver", "incomplete/solver"] {
        fs::create_dir_all(dir.join(program)).unwrap();
    }

    let mut runtime = FakeRuntime::new();
    runtime.team_in(&dir, "a", FakeProgram::Generator, FakeProgram::Solver { max_size: 40 });
    runtime.team_in(&dir, "b", FakeProgram::Generator, FakeProgram::Solver { max_size: 80 });
    let runtime = Arc::new(runtime);
    let arena = arena(&runtime, quiet_config(), iterated(100));

    let result = arena.evaluate(&dir).unwrap();
    fs::remove_dir_all(&dir).unwrap();

    assert_eq!(result.active, ["a", "b"]);
    assert!(result.excluded.contains_key("incomplete"));
    assert_eq!(result.battles.len(), 2);
    assert_eq!(
        result.battle(&Matchup::new("b", "a")).map(Battle::score),
        Some(0.4)
    );
    // 100 more each for the incomplete team
    let points = arena.points(&result);
    assert_close(points.get("a"), 133.3);
    assert_close(points.get("b"), 166.7);
    runtime.assert_clean();
}

#[test]
fn evaluate_rejects_a_missing_directory() {
    let runtime = Arc::new(FakeRuntime::new());
    let arena = arena(&runtime, quiet_config(), iterated(10));
    assert!(arena.evaluate("/definitely/not/a/teams/directory").is_err());
}
