use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

pub const DATA_DIR_ENV: &str = "MAJSOUL_PLUS_DATA_DIR";
pub const SERVER_ONLY_ENV: &str = "SERVER_ONLY";
pub const DEFAULT_SERVER_PORT: u16 = 8887;
pub const USER_CONFIG_FILE: &str = "Configs-user.json";
pub const ACTIVE_ENTRIES_FILE: &str = "active.json";

const PORTABLE_DATA_DIR: &str = "data";
const USER_DATA_DIR_NAME: &str = "majsoul-plus";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDomain {
    pub id: usize,
    pub name: &'static str,
    pub domain: &'static str,
}

pub const REMOTE_DOMAINS: [RemoteDomain; 3] = [
    RemoteDomain {
        id: 0,
        name: "zh",
        domain: "https://majsoul.union-game.com/0/",
    },
    RemoteDomain {
        id: 1,
        name: "jp",
        domain: "https://game.mahjongsoul.com/",
    },
    RemoteDomain {
        id: 2,
        name: "en",
        domain: "https://mahjongsoul.game.yo-star.com/",
    },
];

/// Out-of-range selections fall back to the first domain.
pub fn remote_domain(server_to_play: usize) -> RemoteDomain {
    REMOTE_DOMAINS
        .iter()
        .copied()
        .find(|domain| domain.id == server_to_play)
        .unwrap_or(REMOTE_DOMAINS[0])
}

pub fn http_user_agent(version: &str) -> String {
    format!(
        "Mozilla/5.0 ({} {}) MajsoulPlus/{}",
        env::consts::OS,
        env::consts::ARCH,
        version
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub data_dir: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Resolution order: explicit override, portable `data` folder beside the
    /// executable, then the platform user-data directory (created on demand).
    pub fn resolve(override_dir: Option<&str>, exe_dir: Option<&Path>) -> io::Result<Self> {
        if let Some(raw) = override_dir {
            let path = PathBuf::from(raw.trim());
            if !path.as_os_str().is_empty() {
                fs::create_dir_all(&path)?;
                return Ok(Self::new(path));
            }
        }

        if let Some(exe_dir) = exe_dir {
            let portable = exe_dir.join(PORTABLE_DATA_DIR);
            if portable.is_dir() {
                return Ok(Self::new(portable));
            }
        }

        let user_data = dirs::data_dir()
            .map(|dir| dir.join(USER_DATA_DIR_NAME))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "platform user-data directory is unavailable",
                )
            })?;
        fs::create_dir_all(&user_data)?;
        Ok(Self::new(user_data))
    }

    pub fn from_process_env() -> io::Result<Self> {
        let override_dir = env::var(DATA_DIR_ENV).ok();
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self::resolve(override_dir.as_deref(), exe_dir.as_deref())
    }

    pub fn user_config(&self) -> PathBuf {
        self.data_dir.join(USER_CONFIG_FILE)
    }

    pub fn resource_pack_dir(&self) -> PathBuf {
        self.data_dir.join("resourcepack")
    }

    pub fn extension_dir(&self) -> PathBuf {
        self.data_dir.join("extension")
    }

    pub fn tool_dir(&self) -> PathBuf {
        self.data_dir.join("tool")
    }

    pub fn certificate_file(&self) -> PathBuf {
        self.data_dir.join("certificate").join("cert.crt")
    }

    pub fn private_key_file(&self) -> PathBuf {
        self.data_dir.join("certificate").join("key.pem")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
