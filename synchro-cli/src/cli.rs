//! Command-line surface: argument parsing, prompts and output.

use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use std::path::{Path, PathBuf};

use crate::apps::{self, AppListing, ContainerDetails, ContainerListing};
use crate::context::AppContext;
use crate::deps::DependencySynchronizer;
use crate::error::{Result, SynchroError};
use crate::installer::{self, DependencyAction, InstallOutcome, InstallRequest};
use crate::resolver::ReferenceResolver;
use crate::server::{self, Credentials, InitOptions, ServerSetup};
use crate::settings::SettingsStore;

/// Synchro command line interface
#[derive(Parser, Debug)]
#[command(name = "synchro")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Use the specified configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Run in verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Synchro subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add an app whose container exists in the module store to the current configuration
    Add {
        /// Module store container of the app (prompted if omitted)
        container: Option<String>,

        /// Path to install the app at (defaults to the container name)
        path: Option<String>,
    },

    /// Create a new app in the module store and add it to the current configuration
    New {
        /// Container to create (prompted if omitted)
        container: Option<String>,

        /// Path to install the app at (defaults to the container name)
        path: Option<String>,

        /// Description of the app; quote it if it contains spaces
        description: Option<String>,
    },

    /// Install an app from a local archive or URL
    Install {
        /// Archive path or http(s) URL; with --update, the container to update
        reference: Option<String>,

        /// Container to install into (defaults to the name in package.json)
        container: Option<String>,

        /// Path to install the app at (defaults to the container name)
        path: Option<String>,

        /// Re-install an existing container from the URL it was installed from
        #[arg(short, long)]
        update: bool,
    },

    /// Remove the app from the configuration and delete its container from the module store
    Delete {
        /// Container to delete (prompted and confirmed if omitted)
        container: Option<String>,
    },

    /// Remove an app from the current configuration, leaving its container in place
    Remove {
        /// Installed app path (prompted if omitted)
        path: Option<String>,
    },

    /// List installed apps
    Ls {
        /// Regex used to filter app paths (or container names with --store)
        filter: Option<String>,

        /// Display details from package.json for each app
        #[arg(short, long)]
        details: bool,

        /// Display the app containers in the current module store
        #[arg(short, long)]
        store: bool,
    },

    /// Install dependencies of an app in a remote module store onto this server
    Syncdeps {
        /// Container of the app (prompted if omitted)
        container: Option<String>,
    },

    /// Authenticate to the Synchro server using your account email and password
    Auth {
        /// Server to authenticate against (default: synchro.io)
        #[arg(short, long, value_name = "HOST")]
        server: Option<String>,
    },

    /// Download, install, and configure a Synchro server in the current directory
    Init {
        /// Port the Synchro server will listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Starting port for the debugging engine (must be greater than 1024)
        #[arg(short, long, value_name = "PORT")]
        debug_base_port: Option<u16>,

        /// Do not enable Synchro Studio
        #[arg(short, long)]
        no_studio: bool,

        #[command(flatten)]
        download: DownloadArgs,
    },

    /// Update the Synchro server in the current directory
    Update {
        #[command(flatten)]
        download: DownloadArgs,
    },
}

/// Where to download the Synchro server from.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DownloadArgs {
    /// Server from which to get Synchro packages
    #[arg(short = 's', long, value_name = "HOST")]
    pub download_server: Option<String>,

    /// Download token (defaults to the saved token, or prompts to authenticate)
    #[arg(short = 't', long, value_name = "TOKEN")]
    pub download_token: Option<String>,

    /// Version of the Synchro server to install (default: most current)
    #[arg(long, value_name = "VERSION")]
    pub server_version: Option<String>,
}

/// Execute a parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    let base_dir = std::env::current_dir()?;
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Add { container, path } => {
            let (container, path) = container_and_path(container, path, &mut prompt_text)?;
            let mut ctx = AppContext::open(&base_dir, config_path)?;
            let action = apps::add(&mut ctx, &container, &path)?;
            if action == DependencyAction::Installed {
                println!("Synchro app in container '{container}' dependencies updated");
            }
            println!("Synchro application '{path}' added to the active configuration");
        }
        Command::New {
            container,
            path,
            description,
        } => {
            let (container, path) = container_and_path(container, path, &mut prompt_text)?;
            let description = match description {
                Some(d) => d,
                None => prompt_text("App description", None, true)?,
            };
            let mut ctx = AppContext::open(&base_dir, config_path)?;
            apps::new_app(&mut ctx, &container, &path, &description)?;
            println!("Synchro application '{path}' created");
        }
        Command::Install {
            reference,
            container,
            path,
            update,
        } => {
            let request = install_request(reference, container, path, update, &mut prompt_text)?;
            let mut ctx = AppContext::open(&base_dir, config_path)?;
            let outcome = installer::run(&mut ctx, &request)?;
            print_install_outcome(&outcome);
        }
        Command::Delete { container } => {
            let prompted = container.is_none();
            let container = required(container, "App container", &mut prompt_text)?;
            if prompted {
                let verify = prompt_text(
                    "Warning: All files will be deleted! To confirm, re-enter container name",
                    None,
                    true,
                )?;
                if verify != container {
                    return Err(SynchroError::Input(
                        "Synchro app container name verification failed".to_string(),
                    ));
                }
            }
            let mut ctx = AppContext::open(&base_dir, config_path)?;
            let removed = apps::delete(&mut ctx, &container)?;
            if removed.is_empty() {
                println!(
                    "No Synchro applications currently installed in the active configuration reference the container: {container}"
                );
            }
            for path in &removed {
                println!("Synchro application '{path}' removed from the active configuration");
            }
            println!("Synchro container '{container}' successfully deleted from module store");
        }
        Command::Remove { path } => {
            let path = required(path, "App path", &mut prompt_text)?;
            let mut ctx = AppContext::open(&base_dir, config_path)?;
            apps::remove(&mut ctx, &path)?;
            println!("Synchro application '{path}' removed from the active configuration");
        }
        Command::Ls {
            filter,
            details,
            store,
        } => {
            let filter = filter.as_deref().map(apps::compile_filter).transpose()?;
            let ctx = AppContext::open(&base_dir, config_path)?;
            if store {
                let listings = apps::list_containers(&ctx, filter.as_ref(), details)?;
                if ctx.store.list_containers()?.is_empty() {
                    println!("No Synchro app containers in current module store");
                }
                for listing in &listings {
                    print_lines(&format_container_listing(listing), details);
                }
            } else {
                let listings = apps::list_apps(&ctx, filter.as_ref(), details)?;
                if ctx.registry.is_empty() {
                    println!("No Synchro apps installed in this directory");
                }
                for listing in &listings {
                    print_lines(&format_app_listing(listing), details);
                }
            }
        }
        Command::Syncdeps { container } => {
            let ctx = AppContext::open(&base_dir, config_path)?;
            apps::require_remote_store(&ctx)?;
            let container = required(container, "App container", &mut prompt_text)?;
            if apps::syncdeps(&ctx, &container)? {
                println!("Synchro app in container '{container}' local dependencies updated");
            } else {
                println!("Synchro app in container '{container}' has no dependencies, no action taken");
            }
        }
        Command::Auth { server } => {
            let settings_store = SettingsStore::new()?;
            let settings = settings_store.load()?;
            if let Some(token) = &settings.access_token {
                println!("Existing token is: {token}");
            }
            let host = server.unwrap_or_else(|| settings.host_or_default().to_string());
            prompt_and_authenticate(&settings_store, &host)?;
        }
        Command::Init {
            port,
            debug_base_port,
            no_studio,
            download,
        } => {
            let options = InitOptions {
                port,
                debug_base_port,
                no_studio,
            };
            options.validate()?;
            if server::is_initialized(&base_dir) {
                return Err(SynchroError::AlreadyInitialized);
            }
            let credentials = download_credentials(&download)?;
            let resolver = ReferenceResolver::interactive()?;
            let deps = DependencySynchronizer::npm();
            let setup = ServerSetup {
                base_dir: &base_dir,
                resolver: &resolver,
                deps: &deps,
            };
            let check = setup.init(
                config_path,
                &credentials,
                download.server_version.as_deref(),
                &options,
            )?;
            server::report_node_version(&check);
            println!("Synchro is now initialized in this directory");
        }
        Command::Update { download } => {
            if !server::is_initialized(&base_dir) {
                return Err(SynchroError::NotInitialized);
            }
            let credentials = download_credentials(&download)?;
            let resolver = ReferenceResolver::interactive()?;
            let deps = DependencySynchronizer::npm();
            let setup = ServerSetup {
                base_dir: &base_dir,
                resolver: &resolver,
                deps: &deps,
            };
            let check = setup.update(config_path, &credentials, download.server_version.as_deref())?;
            server::report_node_version(&check);
            println!("Synchro has been updated in this directory");
        }
    }

    Ok(())
}

fn print_install_outcome(outcome: &InstallOutcome) {
    let container = &outcome.container;
    match &outcome.path {
        Some(path) => println!(
            "Synchro application '{path}' installed in container '{container}' from {} archive ({} files)",
            outcome.format.as_str(),
            outcome.files_written
        ),
        None => println!(
            "Synchro app in container '{container}' updated from {} archive ({} files)",
            outcome.format.as_str(),
            outcome.files_written
        ),
    }
    match outcome.dependencies {
        DependencyAction::NotNeeded => {
            println!("Synchro app in container '{container}' has no dependencies, no action needed");
        }
        DependencyAction::Installed => {
            println!("Synchro app in container '{container}' dependencies installed");
        }
        DependencyAction::Deferred => {
            println!(
                "Synchro app in container '{container}' has dependencies, run 'synchro syncdeps {container}' on each server using this module store"
            );
        }
    }
}

fn print_lines(lines: &[String], separated: bool) {
    if separated {
        println!();
    }
    for line in lines {
        println!("{line}");
    }
}

/// Output lines for one registered app.
pub fn format_app_listing(listing: &AppListing) -> Vec<String> {
    let mut lines = vec![if listing.path == listing.container {
        format!("Application: {}", listing.path)
    } else {
        format!(
            "Application: {} [container: {}]",
            listing.path, listing.container
        )
    }];
    if let Some(details) = &listing.details {
        lines.extend(format_details(details));
    }
    lines
}

/// Output lines for one store container.
pub fn format_container_listing(listing: &ContainerListing) -> Vec<String> {
    let container = &listing.container;
    let header = match listing.installed_as.as_slice() {
        [] => format!("Container: {container}"),
        [only] if only == container => format!("Container: {container} [installed]"),
        paths => format!("Container: {container} [installed as {}]", paths.join(", ")),
    };
    let mut lines = vec![header];
    if let Some(details) = &listing.details {
        lines.extend(format_details(details));
    }
    lines
}

fn format_details(details: &ContainerDetails) -> Vec<String> {
    let mut lines = Vec::new();
    match &details.manifest {
        Some(manifest) => {
            lines.push("  App definition from store:".to_string());
            let pretty = serde_json::to_string_pretty(&manifest.as_value())
                .unwrap_or_else(|_| manifest.as_value().to_string());
            lines.extend(pretty.lines().map(|line| format!("  {line}")));
        }
        None => lines.push("  No app definition found".to_string()),
    }
    if details.files.is_empty() {
        lines.push("  No modules found".to_string());
    } else {
        lines.push("  Modules:".to_string());
        lines.extend(details.files.iter().map(|file| format!("    {file}")));
    }
    lines
}

/// Asks for one line of input: prompt, default, whether empty is allowed.
trait Prompt: FnMut(&str, Option<&str>, bool) -> Result<String> {}

impl<F: FnMut(&str, Option<&str>, bool) -> Result<String>> Prompt for F {}

/// Container and path from the command line; prompts for both when the
/// container is missing. The path defaults to the container.
fn container_and_path(
    container: Option<String>,
    path: Option<String>,
    prompt: &mut impl Prompt,
) -> Result<(String, String)> {
    match container {
        Some(container) => {
            let path = path.unwrap_or_else(|| container.clone());
            Ok((container, path))
        }
        None => {
            let container = prompt("App container", None, false)?;
            if container.is_empty() {
                return Err(SynchroError::Input(
                    "Synchro container name cannot be empty".to_string(),
                ));
            }
            let path = prompt("App path", Some(&container), false)?;
            Ok((container, path))
        }
    }
}

/// Build the install request. When the archive reference is prompted for,
/// the container and path are prompted too; a blank container falls back to
/// the name in `package.json`.
fn install_request(
    reference: Option<String>,
    container: Option<String>,
    path: Option<String>,
    update: bool,
    prompt: &mut impl Prompt,
) -> Result<InstallRequest> {
    if update {
        let container = required(reference, "App container", prompt)?;
        return Ok(InstallRequest::Update { container });
    }

    let prompted = reference.is_none();
    let reference = required(reference, "App archive (path or URL)", prompt)?;
    if !prompted {
        return Ok(InstallRequest::Install {
            reference,
            container,
            path,
        });
    }

    let container = prompt("App container (blank to use the package name)", None, true)?;
    if container.trim().is_empty() {
        return Ok(InstallRequest::Install {
            reference,
            container: None,
            path: None,
        });
    }
    let path = prompt("App path", Some(&container), false)?;
    Ok(InstallRequest::Install {
        reference,
        container: Some(container),
        path: Some(path),
    })
}

/// Use a command-line value or prompt for it; empty values are rejected.
fn required(value: Option<String>, label: &str, prompt: &mut impl Prompt) -> Result<String> {
    let value = match value {
        Some(v) => v,
        None => prompt(label, None, false)?,
    };
    if value.trim().is_empty() {
        return Err(SynchroError::Input(format!("{label} cannot be empty")));
    }
    Ok(value)
}

fn prompt_text(prompt: &str, default: Option<&str>, allow_empty: bool) -> Result<String> {
    let mut input = Input::<String>::new()
        .with_prompt(prompt)
        .allow_empty(allow_empty);
    if let Some(default) = default {
        input = input.default(default.to_string());
    }
    input.interact_text().map_err(prompt_error)
}

fn prompt_error(e: dialoguer::Error) -> SynchroError {
    SynchroError::Prompt(e.to_string())
}

fn download_credentials(download: &DownloadArgs) -> Result<Credentials> {
    let settings_store = SettingsStore::new()?;
    let settings = settings_store.load()?;
    server::resolve_credentials(
        download.download_server.as_deref(),
        download.download_token.as_deref(),
        &settings,
        |host| prompt_and_authenticate(&settings_store, host),
    )
}

/// Ask for account credentials, fetch a token and remember it.
fn prompt_and_authenticate(settings_store: &SettingsStore, host: &str) -> Result<String> {
    println!("Enter the email address and password of your account on {host}...");
    let email = prompt_text("Email", None, false)?;
    let password = Password::new()
        .with_prompt("Password")
        .interact()
        .map_err(prompt_error)?;

    let token = server::authenticate(host, &email, &password)?;
    println!("Got token: {token}");

    let mut settings = settings_store.load()?;
    settings.host = Some(host.to_string());
    settings.access_token = Some(token.clone());
    settings_store.save(&settings)?;
    println!("Token saved to {}", display_path(&settings_store.path()));
    Ok(token)
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    #[test]
    fn test_parse_install_update() {
        let cli = Cli::try_parse_from(["synchro", "install", "--update", "bar"]);
        match cli.map(|c| c.command) {
            Ok(Command::Install {
                reference, update, ..
            }) => {
                assert_eq!(reference.as_deref(), Some("bar"));
                assert!(update);
            }
            other => panic!("Unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["synchro", "ls", "^foo", "--store", "-c", "alt.json", "-v"]);
        match cli {
            Ok(cli) => {
                assert_eq!(cli.config, Some(PathBuf::from("alt.json")));
                assert!(cli.verbose);
                assert!(matches!(
                    cli.command,
                    Command::Ls { store: true, details: false, .. }
                ));
            }
            Err(e) => panic!("Failed to parse: {e}"),
        }
    }

    #[test]
    fn test_parse_init_options() {
        let cli = Cli::try_parse_from([
            "synchro",
            "init",
            "--port",
            "8080",
            "--debug-base-port",
            "6868",
            "--no-studio",
            "--download-server",
            "dist.example.com",
            "--server-version",
            "1.4.0",
        ]);
        match cli.map(|c| c.command) {
            Ok(Command::Init {
                port,
                debug_base_port,
                no_studio,
                download,
            }) => {
                assert_eq!(port, Some(8080));
                assert_eq!(debug_base_port, Some(6868));
                assert!(no_studio);
                assert_eq!(download.download_server.as_deref(), Some("dist.example.com"));
                assert_eq!(download.server_version.as_deref(), Some("1.4.0"));
            }
            other => panic!("Unexpected parse result: {other:?}"),
        }
    }

    /// A prompt that replays `answers`; a blank answer takes the default.
    fn scripted<'a>(
        answers: &'a [&'a str],
        asked: &'a mut Vec<String>,
    ) -> impl FnMut(&str, Option<&str>, bool) -> Result<String> + 'a {
        let mut answers = answers.iter();
        move |label: &str, default: Option<&str>, _allow_empty: bool| {
            asked.push(label.to_string());
            let answer = answers.next().copied().unwrap_or_default();
            Ok(if answer.is_empty() {
                default.unwrap_or_default().to_string()
            } else {
                answer.to_string()
            })
        }
    }

    #[test]
    fn test_install_prompts_for_container_and_path() -> Result<(), Box<dyn std::error::Error>> {
        let mut asked = Vec::new();
        let request = install_request(
            None,
            None,
            None,
            false,
            &mut scripted(&["app.tgz", "bar", ""], &mut asked),
        )?;
        assert_eq!(
            request,
            InstallRequest::Install {
                reference: "app.tgz".to_string(),
                container: Some("bar".to_string()),
                path: Some("bar".to_string()),
            }
        );
        assert_eq!(asked.len(), 3);
        assert_eq!(asked[2], "App path");
        Ok(())
    }

    #[test]
    fn test_install_blank_container_uses_package_name() -> Result<(), Box<dyn std::error::Error>> {
        let mut asked = Vec::new();
        let request = install_request(
            None,
            None,
            None,
            false,
            &mut scripted(&["app.tgz", ""], &mut asked),
        )?;
        assert_eq!(
            request,
            InstallRequest::Install {
                reference: "app.tgz".to_string(),
                container: None,
                path: None,
            }
        );
        assert_eq!(asked.len(), 2);
        Ok(())
    }

    #[test]
    fn test_install_arguments_skip_prompts() -> Result<(), Box<dyn std::error::Error>> {
        let mut asked = Vec::new();
        let request = install_request(
            Some("app.tgz".to_string()),
            None,
            None,
            false,
            &mut scripted(&[], &mut asked),
        )?;
        assert_eq!(
            request,
            InstallRequest::Install {
                reference: "app.tgz".to_string(),
                container: None,
                path: None,
            }
        );

        let update = install_request(
            Some("bar".to_string()),
            None,
            None,
            true,
            &mut scripted(&[], &mut asked),
        )?;
        assert_eq!(
            update,
            InstallRequest::Update {
                container: "bar".to_string()
            }
        );
        assert!(asked.is_empty());
        Ok(())
    }

    #[test]
    fn test_format_app_listing() {
        let same = AppListing {
            path: "foo".to_string(),
            container: "foo".to_string(),
            details: None,
        };
        assert_eq!(format_app_listing(&same), vec!["Application: foo"]);

        let aliased = AppListing {
            path: "bar".to_string(),
            container: "foo".to_string(),
            details: None,
        };
        assert_eq!(
            format_app_listing(&aliased),
            vec!["Application: bar [container: foo]"]
        );
    }

    #[test]
    fn test_format_container_listing() -> Result<(), Box<dyn std::error::Error>> {
        let listing = |installed_as: &[&str]| ContainerListing {
            container: "foo".to_string(),
            installed_as: installed_as.iter().map(|s| s.to_string()).collect(),
            details: None,
        };
        assert_eq!(format_container_listing(&listing(&[])), vec!["Container: foo"]);
        assert_eq!(
            format_container_listing(&listing(&["foo"])),
            vec!["Container: foo [installed]"]
        );
        assert_eq!(
            format_container_listing(&listing(&["a", "foo"])),
            vec!["Container: foo [installed as a, foo]"]
        );

        let detailed = ContainerListing {
            details: Some(ContainerDetails {
                manifest: Some(Manifest::from_slice(br#"{ "name": "foo" }"#)?),
                files: vec!["main.js".to_string(), "package.json".to_string()],
            }),
            ..listing(&[])
        };
        let lines = format_container_listing(&detailed);
        assert_eq!(lines[1], "  App definition from store:");
        assert!(lines.contains(&"    \"name\": \"foo\"".to_string()));
        assert!(lines.contains(&"  Modules:".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("    package.json"));
        Ok(())
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
