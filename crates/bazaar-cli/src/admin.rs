//! Admin account commands.

use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub enum AdminCommands {
    /// Create an admin account
    Create {
        #[arg(long)]
        username: String,
        /// Read from `BAZAAR_ADMIN_PASSWORD` when not given
        #[arg(long, env = "BAZAAR_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

const MIN_PASSWORD_LEN: usize = 8;

fn validate(username: &str, password: &str) -> anyhow::Result<()> {
    if username.trim().is_empty() {
        anyhow::bail!("username must be non-empty");
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        anyhow::bail!("password must be at least {MIN_PASSWORD_LEN} characters");
    }
    Ok(())
}

/// # Errors
///
/// Returns an error for invalid input, a taken username, or a database failure.
pub(crate) async fn run(pool: &sqlx::PgPool, command: AdminCommands) -> anyhow::Result<()> {
    match command {
        AdminCommands::Create { username, password } => {
            let username = username.trim();
            validate(username, &password)?;

            let hash = bazaar_core::password::hash_password(&password)
                .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
            let admin = bazaar_db::create_admin(pool, username, &hash)
                .await
                .map_err(|e| {
                    if e.is_unique_violation() {
                        anyhow::anyhow!("admin '{username}' already exists")
                    } else {
                        anyhow::Error::from(e)
                    }
                })?;

            tracing::info!(admin_id = admin.id, "admin created");
            println!("created admin '{}' (id {})", admin.username, admin.id);
        }
    }
    Ok(())
}
