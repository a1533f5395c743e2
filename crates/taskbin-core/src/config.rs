use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::access::DEFAULT_WRITE_SECRET;
use crate::criteria::DEFAULT_PAGE_SIZE;

pub const RC_ENV: &str = "TASKBINRC";
pub const RC_FILE: &str = ".taskbinrc";
pub const DEFAULT_STORE_URL: &str =
  "https://api.jsonbin.io/v3";
pub const DEFAULT_COLLECTION: &str =
  "682c44bf8960c979a59d8006";

const DEFAULTS: [(&str, &str); 6] = [
  ("data.location", "~/.taskbin"),
  ("store.backend", "http"),
  ("store.url", DEFAULT_STORE_URL),
  (
    "store.collection",
    DEFAULT_COLLECTION
  ),
  (
    "access.secret",
    DEFAULT_WRITE_SECRET
  ),
  ("color", "on")
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
  Http,
  File
}

#[derive(Debug, Clone)]
pub struct Config {
  map:              BTreeMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then the rc file found via `rc_override`, `$TASKBINRC`
  /// or `~/.taskbinrc`.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_rc_path(rc_override)? {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.load_file(&path)?;
      }
      | None => {
        debug!(
          "no rc file found; using \
           defaults"
        );
      }
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .map
      .get(key)
      .filter(|v| !v.is_empty())
      .cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    self
      .get(key)
      .map(|v| {
        parse_bool(&v).ok_or_else(|| {
          anyhow!(
            "invalid boolean for {key}: \
             {v}"
          )
        })
      })
      .transpose()
  }

  pub fn backend(
    &self
  ) -> anyhow::Result<Backend> {
    let raw = self
      .get("store.backend")
      .unwrap_or_else(|| {
        "http".to_string()
      });
    match raw
      .to_ascii_lowercase()
      .as_str()
    {
      | "http" => Ok(Backend::Http),
      | "file" => Ok(Backend::File),
      | other => {
        Err(anyhow!(
          "unknown store.backend: \
           {other} (expected http or \
           file)"
        ))
      }
    }
  }

  pub fn timeout(
    &self
  ) -> anyhow::Result<Option<Duration>>
  {
    self
      .get("store.timeout")
      .map(|raw| {
        raw
          .parse::<u64>()
          .map(Duration::from_secs)
          .with_context(|| {
            format!(
              "invalid store.timeout: \
               {raw}"
            )
          })
      })
      .transpose()
  }

  pub fn page_size(
    &self
  ) -> anyhow::Result<NonZeroUsize> {
    match self.get("page.size") {
      | None => Ok(DEFAULT_PAGE_SIZE),
      | Some(raw) => {
        raw
          .parse::<NonZeroUsize>()
          .with_context(|| {
            format!(
              "invalid page.size: {raw}"
            )
          })
      }
    }
  }

  /// A path-valued key, or `fallback` joined onto the data directory.
  pub fn path_or(
    &self,
    key: &str,
    data_dir: &Path,
    fallback: &str
  ) -> PathBuf {
    match self.get(key) {
      | Some(value) => {
        expand_tilde(Path::new(&value))
      }
      | None => data_dir.join(fallback)
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = raw_line
        .split_once('#')
        .map_or(raw_line, |(before, _)| {
          before
        })
        .trim();
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        if include_path == path {
          warn!(include = %include_path.display(), "rc file includes itself; skipping");
          continue;
        }
        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// The data directory from `--data`, `data.location`, or `~/.taskbin`,
/// created when missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => {
      match cfg.get("data.location") {
        | Some(value) => {
          expand_tilde(Path::new(&value))
        }
        | None => {
          home_dir()?.join(".taskbin")
        }
      }
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(from_env) =
    std::env::var(RC_ENV)
  {
    if from_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      from_env
    )));
  }

  let candidate = home_dir()?.join(RC_FILE);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn home_dir() -> anyhow::Result<PathBuf>
{
  dirs::home_dir().ok_or_else(|| {
    anyhow!(
      "cannot determine home \
       directory"
    )
  })
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

pub(crate) fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}
