use std::path::PathBuf;

use clap::Args;
use rce_engine::LanguageRegistry;

use super::load_config;
use crate::error::AppResult;

#[derive(Args)]
pub struct LanguagesArgs {
    /// Path to rce.yaml config file, to show overridden images
    #[arg(long, short)]
    config: Option<PathBuf>,
}

/// Print every enabled language with its image and commands.
pub async fn run_languages(args: LanguagesArgs) -> AppResult<()> {
    let config = load_config(args.config.as_deref()).await?;
    let registry = LanguageRegistry::new(&config.languages);
    for spec in registry.languages() {
        let compile = spec
            .compile_command()
            .and_then(|argv| argv.last().cloned())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<24} {:<10} run: {}  compile: {}",
            spec.language.as_str(),
            spec.image,
            spec.source_file,
            spec.run_command().join(" "),
            compile,
        );
    }
    Ok(())
}
