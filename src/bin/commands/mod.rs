pub mod dependents_cmd;
pub mod evaluate_cmd;
pub mod logic_cmd;
pub mod validate_cmd;

pub use dependents_cmd::cmd_dependents;
pub use evaluate_cmd::cmd_evaluate;
pub use logic_cmd::cmd_logic;
pub use validate_cmd::cmd_validate;
