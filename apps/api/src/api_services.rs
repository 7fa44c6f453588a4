mod database;
mod maintenance;
mod rules;
mod state_builder;

pub use database::connect_and_migrate;
pub use maintenance::spawn_run_history_maintenance;
pub use rules::load_rule_set;
pub use state_builder::build_app_state;
