//! mimic models command: print the built-in catalog.

use anyhow::Result;
use clap::Args;

use mimic_models::catalog;

/// Arguments for the models command
#[derive(Debug, Args)]
pub struct ModelsArgs {
    /// Print repo ids and artifact filenames as well
    #[arg(long)]
    pub detailed: bool,
}

/// Run the models command
pub fn run(args: ModelsArgs) -> Result<()> {
    for name in catalog::known_models() {
        if args.detailed {
            // Catalog names always resolve.
            if let Some(spec) = catalog::catalog_lookup(name) {
                println!("{name}  {}  {}", spec.repo_id, spec.filename);
            }
        } else {
            println!("{name}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        models: ModelsArgs,
    }

    #[test]
    fn models_args_default() {
        let cli = TestCli::parse_from(["test"]);
        assert!(!cli.models.detailed);
    }

    #[test]
    fn models_runs_without_error() {
        assert!(run(ModelsArgs { detailed: false }).is_ok());
        assert!(run(ModelsArgs { detailed: true }).is_ok());
    }
}
