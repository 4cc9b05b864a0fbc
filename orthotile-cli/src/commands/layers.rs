//! Layers command - list what a WMTS server offers.

use std::path::Path;

use orthotile::capabilities::Capabilities;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the layers command.
pub async fn run(url: Option<String>, config_path: Option<&Path>) -> Result<(), CliError> {
    let runner = CliRunner::new(config_path)?;
    runner.log_startup("layers");

    let url = url
        .or_else(|| runner.config().imagery.url.clone())
        .ok_or_else(|| CliError::Usage("No capabilities URL given and none configured".into()))?;

    let client = runner.client();
    let capabilities = runner.capabilities(&client, &url).await?;
    print_layers(&capabilities);
    Ok(())
}

fn print_layers(capabilities: &Capabilities) {
    println!("Tile endpoint: {}", capabilities.base_url);
    println!("Encoding:      {:?}", capabilities.transfer_mode);
    println!();

    for identifier in capabilities.layer_identifiers() {
        let mut bindings = capabilities.layers_named(identifier).peekable();
        let Some(first) = bindings.peek() else {
            continue;
        };
        if first.title.is_empty() || first.title == first.identifier {
            println!("{}  [{}]", identifier, first.format);
        } else {
            println!("{} - {}  [{}]", identifier, first.title, first.format);
        }

        for layer in bindings {
            let set = &layer.tile_matrix_set;
            println!(
                "    {:<24} {:<12} zoom 0-{}",
                set.identifier(),
                set.crs(),
                set.max_zoom()
            );
        }
    }
}
