use miette::Result;
use stackpm_core::version::{version_string, LOCKFILE_VERSION};

pub fn run(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "version": stackpm_core::VERSION,
                "lockfileVersion": LOCKFILE_VERSION,
            })
        );
    } else {
        println!("{}", version_string());
    }
    Ok(())
}
