use gpkg_layer_manager::{EngineConfig, Locator, Portal, SourceManager};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run() {
        eprintln!("inspect_gpkg failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .ok_or("Usage: inspect_gpkg <path-to-gpkg-or-PG:connection-string>")?;
    let portal = Arc::new(Portal::standalone(EngineConfig::new(std::env::temp_dir())));
    let manager = SourceManager::open(Locator::parse(&path), portal)?;

    for layer in manager.layers()? {
        println!("layer: {}", layer.name());
        println!("  features: {}", layer.feature_count()?);
        match layer.projection()? {
            Some(projection) => {
                println!("  proj4: {}", projection.proj4);
                if let Some(name) = projection.projected_crs_name {
                    println!("  projected crs: {name}");
                }
                if let Some(name) = projection.geographic_crs_name {
                    println!("  geographic crs: {name}");
                }
            }
            None => println!("  no spatial reference"),
        }
        for field in layer.full_schema() {
            println!("  {} {} ({})", field.name, field.type_name, field.type_code);
        }
    }

    manager.close()?;
    Ok(())
}
