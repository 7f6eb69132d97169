//! Configuration view and validation commands for `cursus config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use cursus::init::get_cursus_dir;
    use cursus::settings::Settings;

    let cursus_dir = get_cursus_dir(project_dir);
    let settings_path = cursus_dir.join("cursus.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Cursus Configuration");
            println!("====================");
            println!();

            if settings_path.exists() {
                println!("Config file: {}", settings_path.display());
                println!();

                let settings = Settings::load(&settings_path)?;

                println!("[worker]");
                if let Some(cmd) = &settings.worker.command {
                    println!("  command = \"{}\"", cmd);
                }
                if !settings.worker.extra_args.is_empty() {
                    println!("  extra_args = {:?}", settings.worker.extra_args);
                }
                println!("  skip_permissions = {}", settings.worker.skip_permissions);
                println!();

                println!("[policy]");
                println!("  test_retries = {}", settings.policy.test_retries);
                println!("  review_retries = {}", settings.policy.review_retries);
                println!();

                println!("Effective values (with env overrides):");
                println!("  worker command = \"{}\"", settings.worker_command());
                println!("  skip_permissions = {}", settings.skip_permissions());
                println!();
            } else {
                println!("No cursus.toml found at {}", settings_path.display());
                println!();
                println!("Using default configuration:");
                let settings = Settings::default();
                println!("  worker command = \"{}\"", settings.worker_command());
                println!("  skip_permissions = {}", settings.worker.skip_permissions);
                println!("  test_retries = {}", settings.policy.test_retries);
                println!("  review_retries = {}", settings.policy.review_retries);
                println!();
                println!("Run 'cursus config init' to create a cursus.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !settings_path.exists() {
                println!("No cursus.toml found. Using defaults (valid).");
                return Ok(());
            }

            let settings = Settings::load(&settings_path)?;
            let warnings = settings.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if settings_path.exists() {
                println!("cursus.toml already exists at {}", settings_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !cursus_dir.exists() {
                std::fs::create_dir_all(&cursus_dir)?;
            }

            let settings = Settings::default();
            settings.save(&settings_path)?;

            println!("Created cursus.toml at {}", settings_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [worker] command, extra_args, skip_permissions");
            println!("  - [policy] test_retries, review_retries (applied at 'cursus init')");
            println!();
        }
    }

    Ok(())
}
