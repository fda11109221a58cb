/// Sandwich detection engine.
///
/// `normalizer` and `fees` turn mined transactions into comparable records, `correlator` matches
/// front-run / victim / back-run triples, and `scanner` drives both over blocks.
pub mod correlator;
pub mod fees;
pub mod normalizer;
pub mod scanner;
