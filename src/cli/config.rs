use crate::config::generate::generate_starter_config;
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    write_config(&generate_starter_config(), stdout)
}

fn write_config(config_content: &str, stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Try ~/.config/pubsub/config.yml first
    let user_path = dirs::home_dir().and_then(|home_dir| {
        let user_config = home_dir.join(".config/pubsub/config.yml");
        let parent = user_config.parent()?;
        match fs::create_dir_all(parent) {
            Ok(()) => Some(user_config),
            Err(_) => {
                eprintln!("Warning: Could not create directory {}", parent.display());
                eprintln!("Falling back to /etc/pubsub/config.yml");
                None
            }
        }
    });

    let config_path = user_path.unwrap_or_else(|| PathBuf::from("/etc/pubsub/config.yml"));

    if config_path.exists() {
        eprintln!(
            "Error: Config file already exists at {}",
            config_path.display()
        );
        eprintln!("Remove it first or use --stdout to print the config");
        std::process::exit(1);
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::load_config_from_str;

    use super::*;

    #[test]
    fn test_starter_config_loads() {
        let config = load_config_from_str(&generate_starter_config()).unwrap();
        assert_eq!(config.ingress.max_entries_per_request, 10);
    }
}
