/// Shared building blocks: event schemas, configuration, errors, node access, the finding sink
/// and logging.
pub mod abi;
pub mod constants;
pub mod errors;
pub mod sink;
pub mod streams;
pub mod utils;
