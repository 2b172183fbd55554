use accredit::api::queries::{GetApplications, GetNotifications};
use accredit::api::types::{
  ApplicationFilter, ApplicationStatus, NewUser, PageRequest, PermissionChange,
};
use accredit::api::AccreditClient;
use accredit::config::Config;
use accredit::logging;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "accredit")]
#[command(about = "Console for the press-accreditation backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/accredit/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend base URL, overrides the config file
  #[arg(long)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Log in and store the session token
  Login {
    email: String,
    /// Read from ACCREDIT_PASSWORD when omitted
    #[arg(long)]
    password: Option<String>,
  },
  /// Forget the stored session token
  Logout,
  /// List roles
  Roles,
  /// List users
  Users {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 10)]
    limit: u32,
  },
  /// List accreditation applications
  Applications {
    #[arg(long, value_enum)]
    status: Option<StatusArg>,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 10)]
    limit: u32,
  },
  /// Create a console user
  CreateUser {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    role: String,
    /// Read from ACCREDIT_PASSWORD when omitted
    #[arg(long)]
    password: Option<String>,
  },
  /// Grant (or revoke) a permission on a role
  Grant {
    role: String,
    permission: String,
    #[arg(long)]
    revoke: bool,
  },
  /// Download the badge PDF of an application
  Badge {
    application: String,
    #[arg(short, long)]
    out: PathBuf,
  },
  /// Follow applications and notifications, applying push events
  Watch,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusArg {
  Pending,
  Approved,
  Rejected,
}

impl From<StatusArg> for ApplicationStatus {
  fn from(status: StatusArg) -> Self {
    match status {
      StatusArg::Pending => ApplicationStatus::Pending,
      StatusArg::Approved => ApplicationStatus::Approved,
      StatusArg::Rejected => ApplicationStatus::Rejected,
    }
  }
}

fn password(explicit: Option<String>) -> Result<String> {
  explicit
    .or_else(|| std::env::var("ACCREDIT_PASSWORD").ok())
    .ok_or_else(|| eyre!("Password not given. Pass --password or set ACCREDIT_PASSWORD."))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration; a --base-url alone is enough to run
  let config = match (Config::load(args.config.as_deref()), args.base_url) {
    (Ok(config), Some(base_url)) => Config {
      api: accredit::config::ApiConfig { base_url },
      ..config
    },
    (Ok(config), None) => config,
    (Err(_), Some(base_url)) if args.config.is_none() => Config::for_base_url(base_url),
    (Err(e), _) => return Err(e),
  };

  let _guard = logging::init(&config.log_directory()?, &config.log.level)?;
  info!(base_url = %config.api.base_url, "starting");

  let client = AccreditClient::new(&config)?;
  run(&client, args.command).await
}

async fn run(client: &AccreditClient, command: Command) -> Result<()> {
  match command {
    Command::Login { email, password: pw } => {
      let session = client.login(&email, &password(pw)?).await?;
      match session.user {
        Some(user) => println!("Logged in as {} <{}>", user.full_name, user.email),
        None => println!("Logged in"),
      }
    }
    Command::Logout => {
      client.logout()?;
      println!("Logged out");
    }
    Command::Roles => print_json(client.roles().await?.as_ref())?,
    Command::Users { page, limit } => {
      print_json(client.users(PageRequest { page, limit }).await?.as_ref())?
    }
    Command::Applications {
      status,
      page,
      limit,
    } => {
      let filter = ApplicationFilter {
        status: status.map(Into::into),
        page: PageRequest { page, limit },
      };
      print_json(client.applications(filter).await?.as_ref())?
    }
    Command::CreateUser {
      name,
      email,
      role,
      password: pw,
    } => {
      let user = client
        .create_user(NewUser {
          full_name: name,
          email,
          password: password(pw)?,
          role_id: role,
        })
        .await?;
      print_json(&user)?
    }
    Command::Grant {
      role,
      permission,
      revoke,
    } => {
      client
        .set_permission(PermissionChange {
          role_id: role,
          permission_id: permission,
          granted: !revoke,
        })
        .await?;
      println!("{}", if revoke { "Revoked" } else { "Granted" });
    }
    Command::Badge { application, out } => {
      let badge = client.badge(&application).await?;
      std::fs::write(&out, &badge.bytes)
        .map_err(|e| eyre!("Failed to write badge to {}: {}", out.display(), e))?;
      println!("Wrote {} bytes to {}", badge.bytes.len(), out.display());
    }
    Command::Watch => watch(client).await?,
  }
  Ok(())
}

async fn watch(client: &AccreditClient) -> Result<()> {
  let context = client.context();
  let mut applications = context.subscribe::<GetApplications>(ApplicationFilter::default())?;
  let mut notifications = context.subscribe::<GetNotifications>(())?;

  let push = async {
    if client.push_url().is_some() {
      client.follow_push().await
    } else {
      std::future::pending().await
    }
  };
  tokio::pin!(push);

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      applied = &mut push => {
        info!(applied = applied?, "push channel ended");
        break;
      }
      changed = applications.changed() => {
        changed?;
        let result = applications.result();
        if let Some(page) = &result.data {
          print_json(page.as_ref())?;
        } else if let Some(error) = result.error() {
          eprintln!("applications: {}", error);
        }
      }
      changed = notifications.changed() => {
        changed?;
        let result = notifications.result();
        if let Some(list) = &result.data {
          let unread = list.iter().filter(|n| !n.read).count();
          println!("{} unread notification(s)", unread);
        } else if let Some(error) = result.error() {
          eprintln!("notifications: {}", error);
        }
      }
    }
  }
  Ok(())
}
