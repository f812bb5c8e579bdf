use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    /// Root of the statically served tree; avatars land in `<public_dir>/avatars`.
    pub public_dir: PathBuf,
    pub tmp_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
        };
        let public_dir = std::env::var("PUBLIC_DIR")
            .unwrap_or_else(|_| "public".into())
            .into();
        let tmp_dir = std::env::var("TMP_DIR")
            .unwrap_or_else(|_| "tmp".into())
            .into();
        Ok(Self {
            database_url,
            jwt,
            public_dir,
            tmp_dir,
        })
    }

    pub fn avatars_dir(&self) -> PathBuf {
        self.public_dir.join("avatars")
    }
}
