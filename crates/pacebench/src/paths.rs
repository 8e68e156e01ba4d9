use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

pub const ENV_DATA_DIR: &str = "PACEBENCH_DATA_DIR";
pub const ENV_REPORT_DIR: &str = "PACEBENCH_REPORT_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Pacebench";
const APPLICATION: &str = "pacebench";

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
    report_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let data_dir = match env_override(ENV_DATA_DIR) {
            Some(dir) => dir,
            None => ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
                .ok_or_else(|| anyhow!("failed to determine user directories"))?
                .data_dir()
                .to_path_buf(),
        };
        let report_dir = env_override(ENV_REPORT_DIR).unwrap_or_else(|| data_dir.join("reports"));
        Ok(Self {
            data_dir,
            report_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }
}

fn env_override(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
