//! Module defining the trait a problem needs to implement to be used in the arena
//!
//! The arena never looks inside instances or solutions: it hands raw program output to the
//! [`Problem`], which decodes, validates and scores it.

/// What the problem should implement
///
/// All sizes given to these methods are the instance size the generator was asked for.
pub trait Problem: Send + Sync {
    /// A decoded instance.
    type Instance;
    /// A decoded solution.
    type Solution;

    /// Smallest meaningful instance size. Iterated battles start here.
    fn min_size(&self) -> u64 {
        1
    }

    /// Decode the output of a generator.
    ///
    /// Returns the instance and, for problems whose generators also output a certificate
    /// solution, that solution.
    ///
    /// # Error
    /// Returned when the output cannot be decoded at all.
    fn decode_instance(
        &self,
        raw: &[u8],
        size: u64,
    ) -> anyhow::Result<(Self::Instance, Option<Self::Solution>)>;

    /// Encode an instance the way solvers expect it on their standard input.
    fn encode_instance(&self, instance: &Self::Instance) -> Vec<u8>;

    /// Decode the output of a solver.
    ///
    /// # Error
    /// Returned when the output cannot be decoded at all.
    fn decode_solution(&self, raw: &[u8], size: u64) -> anyhow::Result<Self::Solution>;

    /// True if `instance` is a well-formed instance of size `size`.
    fn is_valid_instance(&self, instance: &Self::Instance, size: u64) -> bool;

    /// True if `solution` is a correct solution of `instance`.
    ///
    /// Also used to check generator certificates.
    fn is_valid_solution(
        &self,
        instance: &Self::Instance,
        solution: &Self::Solution,
        size: u64,
    ) -> bool;

    /// Quality of a valid solver solution, `1.0` meaning as good as the generator's certificate.
    ///
    /// The result is clamped to `[0, 1]` by the arena, NaN counting as `0`.
    fn calculate_score(
        &self,
        instance: &Self::Instance,
        generator_solution: Option<&Self::Solution>,
        solver_solution: &Self::Solution,
        size: u64,
    ) -> f64;
}
