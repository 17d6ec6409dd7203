// Bootstraps the first admin account.
//
// Values come from ADMIN_EMAIL, ADMIN_FULL_NAME and ADMIN_PASSWORD when set,
// otherwise from the terminal. Refuses to run once any admin exists.
use bcrypt::{hash, DEFAULT_COST};
use rcr_backend::models::auth::normalize_email;
use rcr_backend::AppConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::io::{self, BufRead, Write};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, PartialEq)]
struct NewAdmin {
    email: String,
    full_name: String,
    password: String,
}

impl NewAdmin {
    /// Normalizes and checks the collected fields; `confirmation` is the
    /// second password entry when one was asked for.
    fn validate(email: &str, full_name: &str, password: String, confirmation: Option<&str>) -> Result<Self, String> {
        let email = normalize_email(email);
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(format!("'{}' is not a valid email address", email)),
        }

        let full_name = full_name.split_whitespace().collect::<Vec<_>>().join(" ");
        if full_name.is_empty() {
            return Err("Full name is required".to_string());
        }

        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!("Password must be at least {} characters long", MIN_PASSWORD_LEN));
        }
        if confirmation.is_some_and(|again| again != password) {
            return Err("The two passwords differ".to_string());
        }

        Ok(Self {
            email,
            full_name,
            password,
        })
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn ask(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn ask_secret(label: &str) -> io::Result<String> {
    rpassword::prompt_password(format!("{} ", label))
}

fn collect() -> Result<NewAdmin, Box<dyn std::error::Error>> {
    let email = match env_value("ADMIN_EMAIL") {
        Some(email) => email,
        None => ask("Admin email:")?,
    };
    let full_name = match env_value("ADMIN_FULL_NAME") {
        Some(name) => name,
        None => ask("Display name:")?,
    };
    let admin = match env_value("ADMIN_PASSWORD") {
        Some(password) => NewAdmin::validate(&email, &full_name, password, None)?,
        None => {
            let password = ask_secret("Choose a password:")?;
            let confirmation = ask_secret("Repeat it:")?;
            NewAdmin::validate(&email, &full_name, password, Some(&confirmation))?
        }
    };
    Ok(admin)
}

async fn admin_exists(pool: &PgPool) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE role = 'admin')")
        .fetch_one(pool)
        .await
}

/// Inserts the approved admin. A taken email surfaces as `None`.
async fn insert_admin(pool: &PgPool, admin: &NewAdmin, password_hash: &str) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO users (email, password_hash, role, full_name, position, is_approved, approval_status, approved_at)
        VALUES ($1, $2, 'admin', $3, 'System Administrator', true, 'approved', NOW())
        ON CONFLICT (email) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&admin.email)
    .bind(password_hash)
    .bind(&admin.full_name)
    .fetch_optional(pool)
    .await
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    if admin_exists(&pool).await? {
        return Err("an admin account already exists; add further admins from the admin panel".into());
    }

    let admin = collect()?;
    let password_hash = hash(&admin.password, DEFAULT_COST)?;
    let id = insert_admin(&pool, &admin, &password_hash)
        .await?
        .ok_or_else(|| format!("{} is already registered", admin.email))?;

    println!("Created admin #{} <{}> ({})", id, admin.email, admin.full_name);
    pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = run().await {
        eprintln!("create_admin: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_normalizes_fields() {
        let admin = NewAdmin::validate(" Admin@RCR.rw ", "  Grace   Uwase ", "secret1".into(), Some("secret1")).unwrap();
        assert_eq!(
            admin,
            NewAdmin {
                email: "admin@rcr.rw".to_string(),
                full_name: "Grace Uwase".to_string(),
                password: "secret1".to_string(),
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(NewAdmin::validate("admin", "Grace", "secret1".into(), None).is_err());
        assert!(NewAdmin::validate("@rcr.rw", "Grace", "secret1".into(), None).is_err());
        assert!(NewAdmin::validate("admin@rcr.rw", "   ", "secret1".into(), None).is_err());
        assert!(NewAdmin::validate("admin@rcr.rw", "Grace", "short".into(), None).is_err());
        assert!(NewAdmin::validate("admin@rcr.rw", "Grace", "secret1".into(), Some("secret2")).is_err());
    }

    #[test]
    fn test_env_password_skips_confirmation() {
        assert!(NewAdmin::validate("admin@rcr.rw", "Grace", "secret1".into(), None).is_ok());
    }
}
