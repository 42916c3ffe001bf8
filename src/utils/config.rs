#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use log::{info, error, LevelFilter};
use serde::Deserialize;
use std::{env, fs, io::ErrorKind, path::Path};
use fs_mistrust::Mistrust;
use std::os::unix::fs::PermissionsExt;
use lazy_static::lazy_static;
use structopt::StructOpt;

use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

// Greeter Utilities
use crate::utils::{greeter_utils, errors::Errors};

use super::greeter_utils::get_absolute_path;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Directory and file locations. Unless otherwise noted, all files and directories
// are relative to the root directory.
const ENV_GREETER_ROOT_DIR : &str = "GREETER_ROOT_DIR";
const DEFAULT_ROOT_DIR     : &str = "~/.greeter";
const CONFIG_DIR           : &str = "/config";
const LOGS_DIR             : &str = "/logs";
const LOG4RS_CONFIG_FILE   : &str = "/log4rs.yml";   // relative to config dir
const GREETER_CONFIG_FILE  : &str = "/greeter.toml"; // relative to config dir

// Networking.
const DEFAULT_HTTP_ADDR    : &str = "0.0.0.0";
const DEFAULT_HTTP_PORT    : u16  = 3000;
const DEFAULT_SHUTDOWN_SECS: u64  = 5;

// Console logging used when no log4rs.yml is installed.
const DEFAULT_LOG_PATTERN  : &str = "{d(%Y-%m-%dT%H:%M:%S%.3f)} {h({l})} {M} - {m}{n}";

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Assign the command line arguments BEFORE RUNTIME_CTX is initialized in main.
lazy_static! {
    pub static ref GREETER_ARGS: GreeterArgs = init_greeter_args();
}

// Calculate the data directories BEFORE RUNTIME_CTX is initialized in main.
lazy_static! {
    pub static ref GREETER_DIRS: GreeterDirs = init_greeter_dirs();
}

// ***************************************************************************
//                             Directory Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// GreeterDirs:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct GreeterDirs {
    pub root_dir: String,
    pub config_dir: String,
    pub logs_dir: String,
}

// ***************************************************************************
//                               Config Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// GreeterArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, StructOpt)]
#[structopt(name = "greeter_args", about = "Command line arguments for the Greeter Server.")]
pub struct GreeterArgs {
    /// Specify the greeter's root data directory.
    ///
    /// This directory contains the config and logs subdirectories.
    #[structopt(short, long)]
    pub root_dir: Option<String>,

    /// Create the data directories and then exit.
    ///
    /// The data directories will be rooted at a root directory calculated
    /// using the following priority order:
    ///
    ///   1. If set, the value of the GREETER_ROOT_DIR environment,
    ///
    ///   2. Otherwise, if set, the value of the --root-dir command line argument,
    ///
    ///   3. Otherwise, ~/.greeter
    ///
    #[structopt(short, long)]
    pub create_dirs_only: bool,

    /// Print the OpenAPI description of the server in YAML and then exit.
    ///
    /// No data directories are created or read.
    #[structopt(short, long)]
    pub print_spec: bool,
}

// ---------------------------------------------------------------------------
// Parms:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct Parms {
    pub config_file: String,
    pub config: Config,
}

// ---------------------------------------------------------------------------
// RuntimeCtx:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct RuntimeCtx {
    pub parms: Parms,
    pub greeter_args: &'static GreeterArgs,
    pub greeter_dirs: &'static GreeterDirs,
}

// ---------------------------------------------------------------------------
// Config:
// ---------------------------------------------------------------------------
/** Contents of greeter.toml.  Every key is optional. */
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub title: String,
    pub http_addr: String,
    pub http_port: u16,
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// The socket address the server binds.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_addr, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "Greeter Server".to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_SECS,
        }
    }
}

// ***************************************************************************
//                            Directory Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_greeter_args:
// ---------------------------------------------------------------------------
/** Get the command line arguments. */
fn init_greeter_args() -> GreeterArgs {
    GreeterArgs::from_args()
}

// ---------------------------------------------------------------------------
// init_greeter_dirs:
// ---------------------------------------------------------------------------
/** Calculate the external data directories.  Any failure results in a panic
 * since the server cannot start without them.
 */
fn init_greeter_dirs() -> GreeterDirs {
    let mistrust = match get_mistrust() {
        Ok(m) => m,
        Err(e) => panic!("{}", e),
    };

    // Check that each path is absolute and is a directory with the
    // proper permission assign if it exists.  If it doesn't exist,
    // create it.
    let root_dir = get_root_dir();
    let config_dir = root_dir.clone() + CONFIG_DIR;
    let logs_dir = root_dir.clone() + LOGS_DIR;
    for (dir, msgname) in [(&root_dir, "root directory"),
                           (&config_dir, "config directory"),
                           (&logs_dir, "logs directory")] {
        if let Err(e) = check_greeter_dir(dir, msgname, &mistrust) {
            panic!("{}", e);
        }
    }

    GreeterDirs { root_dir, config_dir, logs_dir }
}

// ---------------------------------------------------------------------------
// check_greeter_dir:
// ---------------------------------------------------------------------------
/** Check that the path is absolute and, if it exists, that it has the proper
 * permissions assigned.  If it doesn't exist, create it.  The mistrust package
 * creates directories with 0o700 permissions.
 */
fn check_greeter_dir(dir: &str, msgname: &str, mistrust: &Mistrust) -> Result<()> {
    let path = Path::new(dir);
    if !path.is_absolute() {
        return Err(Errors::DirectoryError(
            format!("The greeter {} path must be absolute: {}", msgname, dir)).into());
    }

    if path.exists() {
        if !path.is_dir() {
            return Err(Errors::DirectoryError(
                format!("The greeter {} path must be a directory: {}", msgname, dir)).into());
        }

        // Make sure the directory has rwx for owner only.
        let perm = path.metadata()?.permissions().mode();
        if perm & 0o777 != 0o700 {
            return Err(Errors::DirectoryError(
                format!("The greeter {} path must have 0o700 permissions: {}", msgname, dir)).into());
        }
    } else if let Err(e) = mistrust.make_directory(path) {
        return Err(Errors::DirectoryError(
            format!("Make directory error for {:?}: {}", path, e)).into());
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// get_mistrust:
// ---------------------------------------------------------------------------
/** Configure a new mistrust object for initial directory processing. */
fn get_mistrust() -> Result<Mistrust> {
    Mistrust::builder()
        .ignore_prefix(get_absolute_path("~"))
        .trust_group(0)
        .build()
        .map_err(|e| anyhow!(Errors::DirectoryError(
            format!("Mistrust configuration error: {}", e))))
}

// ---------------------------------------------------------------------------
// get_root_dir:
// ---------------------------------------------------------------------------
fn get_root_dir() -> String {
    // Order of precedence:
    //  1. Environment variable
    //  2. Command line --root-dir argument
    //  3. Default location
    //
    let root_dir = env::var(ENV_GREETER_ROOT_DIR).unwrap_or_else(
        |_| {
            match GREETER_ARGS.root_dir.clone() {
                Some(r) => r,
                None => DEFAULT_ROOT_DIR.to_string(),
            }
        });

    get_absolute_path(&root_dir)
}

// ***************************************************************************
//                               Log Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_log:
// ---------------------------------------------------------------------------
/** Initialize log4rs from the installed log4rs.yml or, when there is none,
 * with a console appender at info level.  Failure is fatal.
 */
pub fn init_log() {
    let logconfig = init_log_config();
    let result = if Path::new(&logconfig).is_file() {
        log4rs::init_file(&logconfig, Default::default())
            .map(|_| format!("Log4rs initialized using: {}", logconfig))
    } else {
        init_console_log()
            .map(|_| format!("Log4rs initialized with console logging, no file at: {}", logconfig))
    };

    match result {
        Ok(msg) => info!("{}", msg),
        Err(e) => {
            println!("{}", e);
            let s = format!("{}", Errors::Log4rsInitialization(logconfig));
            panic!("{}", s);
        },
    }
}

// ---------------------------------------------------------------------------
// init_log_config:
// ---------------------------------------------------------------------------
fn init_log_config() -> String {
    GREETER_DIRS.config_dir.clone() + LOG4RS_CONFIG_FILE
}

// ---------------------------------------------------------------------------
// init_console_log:
// ---------------------------------------------------------------------------
fn init_console_log() -> Result<()> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(DEFAULT_LOG_PATTERN)))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    Ok(())
}

// ***************************************************************************
//                             Parms Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_parms:
// ---------------------------------------------------------------------------
/** Retrieve the application parameters from greeter.toml in the config
 * directory.  A missing file means default values; a file that cannot be
 * read or parsed is an error.
 */
fn get_parms() -> Result<Parms> {
    let config_file = GREETER_DIRS.config_dir.clone() + GREETER_CONFIG_FILE;
    let config_file_abs = greeter_utils::get_absolute_path(&config_file);
    info!("{}", Errors::ReadingConfigFile(config_file_abs.clone()));
    let contents = match read_config_file(&config_file_abs)? {
        Some(c) => c,
        None => {
            info!("No configuration file at {}. Using default values.", config_file_abs);
            return Ok(Parms { config_file: Default::default(), config: Config::new() });
        }
    };

    let config = parse_config(&contents, &config_file_abs)?;
    Ok(Parms { config_file: config_file_abs, config })
}

// ---------------------------------------------------------------------------
// read_config_file:
// ---------------------------------------------------------------------------
/** Return the file's contents, or None if it does not exist.  Any other read
 * failure (permissions, a directory at the path, invalid UTF-8) is an error.
 */
fn read_config_file(config_file: &str) -> Result<Option<String>> {
    match fs::read_to_string(config_file) {
        Ok(c) => Ok(Some(c)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => {
            error!("{}: {}", Errors::ReadingConfigFile(config_file.to_string()), e);
            Err(Errors::IOError(e).into())
        }
    }
}

// ---------------------------------------------------------------------------
// parse_config:
// ---------------------------------------------------------------------------
fn parse_config(contents: &str, config_file: &str) -> Result<Config> {
    match toml::from_str(contents) {
        Ok(c)  => Ok(c),
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::TOMLParseError(config_file.to_string()), e);
            error!("{}", msg);
            Err(anyhow!(msg))
        }
    }
}

// ***************************************************************************
//                             Config Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_runtime_context:
// ---------------------------------------------------------------------------
pub fn init_runtime_context() -> RuntimeCtx {
    // The application aborts if the configuration can't be read.
    let parms = match get_parms() {
        Ok(p) => p,
        Err(e) => panic!("FAILED to read configuration file: {}", e),
    };
    RuntimeCtx {parms, greeter_args: &GREETER_ARGS, greeter_dirs: &GREETER_DIRS}
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::{check_greeter_dir, parse_config, read_config_file, Config};
    use fs_mistrust::Mistrust;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    // Mistrust that does not judge the temp dir's ancestors.
    fn test_mistrust() -> Mistrust {
        Mistrust::new_dangerously_trust_everyone()
    }

    fn path_str(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_str().unwrap().to_string()
    }

    #[test]
    fn default_config_listens_on_3000() {
        let config = Config::new();
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.shutdown_timeout_secs, 5);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("", "greeter.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let config = parse_config("http_port = 8080\n", "greeter.toml").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.http_addr, "0.0.0.0");
        assert_eq!(config.title, "Greeter Server");
    }

    #[test]
    fn full_file() {
        let toml = r#"
            title = "Test Greeter"
            http_addr = "127.0.0.1"
            http_port = 4000
            shutdown_timeout_secs = 1
        "#;
        let config = parse_config(toml, "greeter.toml").unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:4000");
        assert_eq!(config.title, "Test Greeter");
        assert_eq!(config.shutdown_timeout_secs, 1);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let err = parse_config("http_port = \"not a port\"", "/x/greeter.toml").unwrap_err();
        assert!(err.to_string().contains("Unable to parse TOML file: /x/greeter.toml"));
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let dir = TempDir::new().unwrap();
        let contents = read_config_file(&path_str(&dir, "greeter.toml")).unwrap();
        assert!(contents.is_none());
    }

    #[test]
    fn existing_config_file_is_read() {
        let dir = TempDir::new().unwrap();
        let file = path_str(&dir, "greeter.toml");
        fs::write(&file, "http_port = 8080\n").unwrap();
        assert_eq!(read_config_file(&file).unwrap().as_deref(), Some("http_port = 8080\n"));
    }

    #[test]
    fn directory_at_config_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = path_str(&dir, "greeter.toml");
        fs::create_dir(&file).unwrap();
        assert!(read_config_file(&file).is_err());
    }

    #[test]
    fn non_utf8_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = path_str(&dir, "greeter.toml");
        fs::write(&file, [0xff, 0xfe, 0xfd]).unwrap();
        assert!(read_config_file(&file).is_err());
    }

    #[test]
    fn relative_data_dir_is_rejected() {
        let err = check_greeter_dir("relative/greeter", "root directory", &test_mistrust()).unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn file_as_data_dir_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = path_str(&dir, "logs");
        fs::write(&file, "").unwrap();
        let err = check_greeter_dir(&file, "logs directory", &test_mistrust()).unwrap_err();
        assert!(err.to_string().contains("must be a directory"));
    }

    #[test]
    fn open_data_dir_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = path_str(&dir, "config");
        fs::create_dir(&config).unwrap();
        fs::set_permissions(&config, fs::Permissions::from_mode(0o755)).unwrap();
        let err = check_greeter_dir(&config, "config directory", &test_mistrust()).unwrap_err();
        assert!(err.to_string().contains("0o700"));
    }

    #[test]
    fn private_data_dir_is_accepted() {
        let dir = TempDir::new().unwrap();
        let config = path_str(&dir, "config");
        fs::create_dir(&config).unwrap();
        fs::set_permissions(&config, fs::Permissions::from_mode(0o700)).unwrap();
        check_greeter_dir(&config, "config directory", &test_mistrust()).unwrap();
    }

    #[test]
    fn missing_data_dir_is_created_private() {
        let dir = TempDir::new().unwrap();
        let logs = path_str(&dir, "logs");
        check_greeter_dir(&logs, "logs directory", &test_mistrust()).unwrap();
        let meta = fs::metadata(&logs).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
    }
}
