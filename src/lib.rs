#[macro_use]
extern crate rocket;
#[macro_use]
extern crate serde;
#[cfg(test)]
#[macro_use]
extern crate lazy_static;

use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedHeaders, AllowedOrigins};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::{Config, StorageKind};
use crate::error::{BackendError, ConfigurationError};
use crate::lifecycle::SessionManager;
use crate::route::mount_api;
use crate::security::Security;
use crate::store::{MemoryStore, MongoStore, Storage};

pub mod config;
pub mod data;
pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod resp;
pub mod role;
pub mod route;
pub mod security;
pub mod store;
pub mod util;

/// Session lifecycle over the configured store, managed as Rocket state.
pub type Backend = SessionManager<Storage>;

pub async fn create(log_level: Option<Level>) -> Result<Rocket<Build>, BackendError> {
    if let Some(l) = log_level {
        let subscriber = FmtSubscriber::builder().with_max_level(l).finish();

        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Unable to set global logger: {}", err);
        };
        if let Err(err) = tracing_log::LogTracer::init() {
            eprintln!("Unable to forward log records: {}", err);
        }
    }

    tracing::info!("Reading .env file...");
    if dotenv::dotenv().is_err() {
        tracing::warn!("Unable to load .env file.");
    }

    tracing::info!("Loading configuration...");
    let c = match Config::load() {
        Ok(c) => {
            tracing::info!("Configuration loaded.");
            c
        }
        Err(ConfigurationError::NotFound(_)) => {
            let c = Config::default();
            if c.save().is_err() {
                tracing::warn!("Unable to save generated configuration.");
            }
            c
        }
        Err(other) => {
            tracing::error!("Configuration error: {}", other);
            return Err(other.into());
        }
    };

    tracing::info!("Initializing security information...");
    let security = Security::load()?;

    build(c, security).await
}

/// Assembles the server from already loaded configuration and keys.
pub async fn build(c: Config, security: Security) -> Result<Rocket<Build>, BackendError> {
    let storage = match c.storage {
        StorageKind::MongoDb => {
            Storage::Mongo(MongoStore::connect(&c.mongodb_uri, &c.mongodb_db).await?)
        }
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage, nothing will be persisted.");
            Storage::Memory(MemoryStore::new())
        }
    };
    let backend: Backend = SessionManager::new(storage);

    tracing::info!("Setting up CORS...");
    let cors = rocket_cors::CorsOptions {
        allowed_origins: AllowedOrigins::All,
        allowed_methods: vec![Method::Get, Method::Put, Method::Post, Method::Delete]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: AllowedHeaders::All,
        allow_credentials: true,
        ..Default::default()
    }
    .to_cors()?;

    tracing::info!("Starting HTTP server...");
    let r = rocket::build()
        .manage(c)
        .manage(security)
        .manage(backend)
        .attach(cors);

    Ok(mount_api(r))
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;
    use rocket::http::Cookie;
    use rocket::local::asynchronous::Client;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::data::user::{Gender, PasswordHash, Profile, User};
    use crate::resp::jwt::UserRoleToken;
    use crate::role::Role;
    use crate::security::Security;
    use crate::store::Store;
    use crate::Backend;

    lazy_static! {
        pub static ref SECURITY: Security = Security::load_from(
            std::env::temp_dir().join(format!("tutormatch-test-keys-{}", std::process::id()))
        )
        .expect("unable to set up test keys");
    }

    pub const SAMPLE_PASSWORD: &str = "sample_password";

    pub fn sample_user(role: Role) -> User {
        let id = Uuid::new_v4();
        let profile = match role {
            Role::Student => Profile::Student { grade: None },
            Role::Tutor => Profile::Tutor {
                rate: Some(15.0),
                grades: [("Grade 10-12".to_string(), vec!["Math".to_string()])]
                    .into_iter()
                    .collect(),
            },
            Role::Admin => Profile::Admin,
        };
        User {
            id,
            email: format!("{}-{}@example.com", role, id.simple()),
            name: format!("Sample {}", role),
            pw_hash: PasswordHash::new(SAMPLE_PASSWORD).expect("hashing works"),
            province: "Amman".to_string(),
            gender: Gender::Female,
            created_at: Utc::now(),
            profile,
        }
    }

    pub async fn client() -> Client {
        let r = crate::build(Config::memory(), SECURITY.clone())
            .await
            .expect("invalid backend");
        Client::tracked(r).await.expect("invalid rocket instance")
    }

    pub fn backend(client: &Client) -> &Backend {
        client.rocket().state().expect("backend is managed")
    }

    /// Stores a new user of `role` and returns it with its auth cookie.
    pub async fn sign_in(client: &Client, role: Role) -> (User, Cookie<'static>) {
        let user = sample_user(role);
        backend(client)
            .store()
            .insert_user(&user)
            .await
            .expect("unable to store test user");
        let cookie = UserRoleToken::new(&user)
            .cookie(&SECURITY.jwt_keys.private)
            .expect("unable to encode auth cookie");
        (user, cookie)
    }
}
