use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::{DATA_DIR_NAME, DB_FILE};
use crate::db::Database;
use crate::models::Role;

/// Creates `.ticketdesk/` under `path`. With `admin`, also creates the first
/// project manager when the directory has no users yet.
pub fn run(path: &Path, admin: Option<&str>) -> Result<()> {
    let data_dir = path.join(DATA_DIR_NAME);
    let existed = data_dir.exists();

    fs::create_dir_all(&data_dir).context("Failed to create .ticketdesk directory")?;
    let db = Database::open(&data_dir.join(DB_FILE))?;

    if existed {
        println!("Already initialized at {}", path.display());
    } else {
        println!("Created {}", data_dir.display());
    }

    if let Some(name) = admin {
        if db.list_users()?.is_empty() {
            let id = db.create_user(name, Role::Pm, None)?;
            println!("Created project manager #{}: {}", id, name.trim());
            println!("\nNext steps:");
            println!("  export TICKETDESK_USER={}", id);
            println!("  ticketdesk branch add \"Head office\"");
        } else {
            println!("Users already exist; --admin ignored.");
        }
    }

    Ok(())
}
