use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Report, Result};
use std::path::PathBuf;

use linode_manager::cache::RootResource;
use linode_manager::config::Config;
use linode_manager::error_set::{self, ErrorSet};
use linode_manager::linode::{ConfigUpdate, Linode, LinodeClient, NewLinode};
use linode_manager::{logging, ApiError};

#[derive(Parser, Debug)]
#[command(name = "linode-manager")]
#[command(about = "Manage Linodes through the Linode API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/linode-manager/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List Linodes, one page at a time or all of them
  Linodes {
    #[arg(long, conflicts_with = "all")]
    page: Option<u32>,
    #[arg(long)]
    all: bool,
  },
  /// Show one Linode
  Show { id: u64 },
  /// List the configs of a Linode
  Configs { id: u64 },
  /// List the disks of a Linode
  Disks { id: u64 },
  /// List available kernels
  Kernels,
  /// Create one Linode per label
  Create {
    #[arg(required = true)]
    labels: Vec<String>,
    #[arg(long)]
    region: Option<String>,
    #[arg(long = "type")]
    plan: Option<String>,
    #[arg(long)]
    distribution: Option<String>,
    #[arg(long)]
    group: Option<String>,
    #[arg(long)]
    backups: bool,
  },
  Rename { id: u64, label: String },
  Delete { id: u64 },
  Boot { id: u64 },
  Reboot { id: u64 },
  Shutdown { id: u64 },
  /// Reset the root password of a disk (password from LINODE_MANAGER_ROOT_PASS)
  RootPass {
    id: u64,
    /// Disk to reset (default: the first eligible disk)
    #[arg(long)]
    disk: Option<u64>,
  },
  /// Edit the label or notes of a config
  ConfigUpdate {
    linode: u64,
    config: u64,
    #[arg(long)]
    label: Option<String>,
    #[arg(long)]
    comments: Option<String>,
  },
  ConfigDelete { linode: u64, config: u64 },
}

/// Environment variable holding root passwords for new Linodes and resets.
const ROOT_PASS_VAR: &str = "LINODE_MANAGER_ROOT_PASS";

/// Fields the create command can attribute errors to.
const CREATE_FIELDS: &[&str] = &["label", "group", "region", "type", "distribution", "root_pass"];

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let client = LinodeClient::new(&config)?;
  run(&client, args.command).await
}

async fn run(client: &LinodeClient, command: Command) -> Result<()> {
  match command {
    Command::Linodes { page, all } => {
      if all {
        let linodes = client.all_linodes().await.map_err(failed)?;
        linodes.iter().for_each(print_linode);
      } else {
        let page = page.unwrap_or(1);
        let linodes = client.linodes_page(page).await.map_err(failed)?;
        linodes.iter().for_each(print_linode);
        if let Some(collection) = client.cache().collection(&Linode::collection()) {
          println!(
            "page {} of {}, {} linodes",
            page,
            collection.total_pages_or_sentinel(),
            collection.total_results()
          );
        }
      }
    }
    Command::Show { id } => {
      let linode = client.linode(id).await.map_err(failed)?;
      println!(
        "{}",
        serde_json::to_string_pretty(&linode).map_err(|e| eyre!("Failed to format linode: {}", e))?
      );
    }
    Command::Configs { id } => {
      for config in client.linode_configs(id).await.map_err(failed)? {
        let kernel = config.kernel.as_ref().map(|k| k.id()).unwrap_or("-");
        println!("{}\t{}\t{}\t{}", config.id, config.label, kernel, config.virt_mode);
      }
    }
    Command::Disks { id } => {
      for disk in client.linode_disks(id).await.map_err(failed)? {
        println!("{}\t{}\t{} MB\t{}", disk.id, disk.label, disk.size, disk.filesystem);
      }
    }
    Command::Kernels => {
      for kernel in client.all_kernels().await.map_err(failed)? {
        println!("{}\t{}", kernel.id, kernel.display_name());
      }
    }
    Command::Create {
      labels,
      region,
      plan,
      distribution,
      group,
      backups,
    } => {
      let template = NewLinode {
        group,
        region,
        plan,
        distribution,
        root_pass: std::env::var(ROOT_PASS_VAR).ok(),
        backups,
        ..Default::default()
      };
      let batch = client.create_linodes(&template, &labels).await;
      batch.created.iter().for_each(print_linode);
      if let Some((label, err)) = batch.failure {
        eprintln!("Creating {} failed", label);
        return Err(form_failed(&err, CREATE_FIELDS));
      }
    }
    Command::Rename { id, label } => {
      let linode = client
        .rename_linode(id, &label)
        .await
        .map_err(|e| form_failed(&e, &["label"]))?;
      print_linode(&linode);
    }
    Command::Delete { id } => {
      client.delete_linode(id).await.map_err(failed)?;
      println!("Deleted linode {}", id);
    }
    Command::Boot { id } => print_linode(&client.boot(id).await.map_err(failed)?),
    Command::Reboot { id } => print_linode(&client.reboot(id).await.map_err(failed)?),
    Command::Shutdown { id } => print_linode(&client.shutdown(id).await.map_err(failed)?),
    Command::RootPass { id, disk } => {
      let password =
        std::env::var(ROOT_PASS_VAR).map_err(|_| eyre!("Set {} to the new root password", ROOT_PASS_VAR))?;
      let disk = match disk {
        Some(disk) => disk,
        None => client
          .root_password_disks(id)
          .await
          .map_err(failed)?
          .first()
          .map(|disk| disk.id)
          .ok_or_else(|| eyre!("This Linode does not have any disks eligible for password reset."))?,
      };
      let disk = client
        .reset_root_password(id, disk, &password)
        .await
        .map_err(|e| form_failed(&e, &["password"]))?;
      println!("Reset root password of disk {} ({})", disk.id, disk.label);
    }
    Command::ConfigUpdate {
      linode,
      config,
      label,
      comments,
    } => {
      let current = client.linode_config(linode, config).await.map_err(failed)?;
      let base = ConfigUpdate::from_config(&current);
      let update = ConfigUpdate {
        label: label.or(base.label),
        comments: comments.or(base.comments),
        ..base
      };
      let saved = client
        .update_config(linode, config, &update)
        .await
        .map_err(|e| form_failed(&e, ConfigUpdate::FIELDS))?;
      println!("{}\t{}\t{}", saved.id, saved.label, saved.comments);
    }
    Command::ConfigDelete { linode, config } => {
      client.delete_config(linode, config).await.map_err(failed)?;
      println!("Deleted config {} of linode {}", config, linode);
    }
  }

  Ok(())
}

fn print_linode(linode: &Linode) {
  println!(
    "{}\t{}\t{}\t{}",
    linode.id,
    linode.label,
    linode.status,
    linode.group.as_deref().unwrap_or("")
  );
}

fn failed(err: ApiError) -> Report {
  eyre!("{}", err)
}

/// Report a rejected form. Validation messages are printed grouped by field
/// first.
fn form_failed(err: &ApiError, fields: &[&str]) -> Report {
  if !err.is_validation() {
    return eyre!("{}", err);
  }
  print_errors(&error_set::reduce_for_fields(err, fields));
  eyre!("The server rejected the request")
}

fn print_errors(errors: &ErrorSet) {
  for message in errors.general() {
    eprintln!("error: {}", message);
  }
  for (field, messages) in errors.fields() {
    eprintln!("{}:", field);
    for message in messages {
      eprintln!("  {}", message);
    }
  }
}
