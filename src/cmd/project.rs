//! Project initialization.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use cursus::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized cursus project at {}",
            result.cursus_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .cursus/");
        println!("  ├── workflow.json # Phase graph (edit to reshape the workflow)");
        println!("  ├── cursus.toml   # Worker command and retry policy");
        println!("  ├── artifacts/    # Worker-produced artifact files");
        println!("  └── logs/         # Per-attempt prompts and transcripts");
        println!();
        println!("Next steps:");
        println!("  1. Review `.cursus/workflow.json` and `.cursus/cursus.toml`");
        println!("  2. Run `cursus start --brief \"what to build\"` to begin a run");
        println!("  3. Run `cursus status` at any time to see where the run is");
    } else {
        println!(
            "Cursus project already initialized at {}",
            result.cursus_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
