use env_logger::{Builder, Env};

/// Install the global logger. `RUST_LOG` wins over the defaults below.
pub fn init(verbose: bool) -> Result<(), log::SetLoggerError> {
    let default_filter = if verbose {
        "dupecheck=debug"
    } else {
        "dupecheck=info"
    };
    Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_target(false)
        .try_init()
}
