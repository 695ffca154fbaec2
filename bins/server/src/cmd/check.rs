use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;

/// Parse and validate the config file without touching any backend.
pub fn run(args: ServeArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    config.validate()?;
    println!(
        "{}: ok (store={}, graph={}, broker={}, schema_registry={}, api_port={})",
        args.config,
        config.store.kind(),
        config.graph.kind(),
        config.broker.kind(),
        config.schema_registry.kind(),
        config.api_port,
    );
    Ok(())
}
