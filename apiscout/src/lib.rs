// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

pub use handlers::{
    build_run_config, config_path_for, default_database_path, initialize_config_dir,
    overrides_from_args, verbosity_filter,
};
