mod control_client;
mod settings;

use std::io::{BufRead, Write};

use control_client::SyncClient;
use settings::read_settings_snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Status,
    SelectFolder,
    SetFolder(String),
    Start(Option<String>),
    Stop,
    SavedPath,
    Login,
    Logout,
    List(Option<String>),
    ShowSettings,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(flag) = args.next() else {
        return Ok(CliMode::Status);
    };
    let value = args.next();
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }
    let mode = match flag.as_str() {
        "--status" => CliMode::Status,
        "--select-folder" => CliMode::SelectFolder,
        "--set-folder" => CliMode::SetFolder(
            value
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--set-folder needs a path"))?,
        ),
        "--start" => CliMode::Start(value.clone()),
        "--stop" => CliMode::Stop,
        "--saved-path" => CliMode::SavedPath,
        "--login" => CliMode::Login,
        "--logout" => CliMode::Logout,
        "--list" => CliMode::List(value.clone()),
        "--show-settings" => CliMode::ShowSettings,
        "--help" | "-h" => {
            print_help();
            return Ok(CliMode::Help);
        }
        other => anyhow::bail!("unknown argument: {other}"),
    };
    let takes_value = matches!(
        mode,
        CliMode::SetFolder(_) | CliMode::Start(_) | CliMode::List(_)
    );
    if !takes_value && let Some(value) = value {
        anyhow::bail!("unexpected argument: {value}");
    }
    Ok(mode)
}

fn main() -> anyhow::Result<()> {
    let mode = parse_cli_mode(std::env::args())?;
    match mode {
        CliMode::Help => return Ok(()),
        CliMode::ShowSettings => {
            println!("{}", serde_json::to_string_pretty(&read_settings_snapshot())?);
            return Ok(());
        }
        _ => {}
    }

    let client = SyncClient::connect()
        .map_err(|err| anyhow::anyhow!("vaultsyncd D-Bus service is not available: {err}"))?;
    match mode {
        CliMode::Status => print_status(&client)?,
        CliMode::SelectFolder => match client.select_folder()? {
            Some(path) => println!("Sync folder: {path}"),
            None => println!("Folder selection cancelled"),
        },
        CliMode::SetFolder(path) => {
            let path = absolutize(&path)?;
            println!("Sync folder: {}", client.set_folder(&path)?);
        }
        CliMode::Start(path) => {
            let path = path.as_deref().map(absolutize).transpose()?;
            client.start(path.as_deref())?;
            print_status(&client)?;
        }
        CliMode::Stop => {
            client.stop()?;
            print_status(&client)?;
        }
        CliMode::SavedPath => match client.saved_path()? {
            Some(path) => println!("{path}"),
            None => println!("No sync folder selected"),
        },
        CliMode::Login => {
            let token = read_token()?;
            client.login(&token)?;
            println!("Signed in");
        }
        CliMode::Logout => {
            client.logout()?;
            println!("Signed out");
        }
        CliMode::List(extension) => {
            let files = client.list_files(extension.as_deref())?;
            if files.is_empty() {
                println!("No files");
            }
            for file in files {
                println!("{}\t{}\t{}", file.uploaded_at, file.extension, file.name);
            }
        }
        CliMode::ShowSettings | CliMode::Help => unreachable!("handled before connecting"),
    }
    Ok(())
}

fn print_status(client: &SyncClient) -> anyhow::Result<()> {
    let status = client.status()?;
    println!("Phase: {}", status.phase.as_str());
    println!("Status: {}", status.text);
    Ok(())
}

fn absolutize(path: &str) -> anyhow::Result<String> {
    let path = std::path::Path::new(path);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(absolute.display().to_string())
}

/// Reads the API token from stdin so it stays out of the process list.
fn read_token() -> anyhow::Result<String> {
    print!("API token: ");
    std::io::stdout().flush()?;
    let mut token = String::new();
    std::io::stdin().lock().read_line(&mut token)?;
    let token = token.trim().to_string();
    if token.is_empty() {
        anyhow::bail!("no token entered");
    }
    Ok(token)
}

fn print_help() {
    println!(
        "Usage: vaultsync-ctl [--status | --select-folder | --set-folder <path> | --start [path] | --stop | --saved-path | --login | --logout | --list [extension] | --show-settings]\n(with no flags, prints the daemon status)"
    );
}
