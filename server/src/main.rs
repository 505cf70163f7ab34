use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use fazt::core::app::Builder;
use fazt::prelude::*;
use fazt_core::WorkerPool;
use fazt_substrate_sqlite::SqliteSubstrate;

#[derive(Parser)]
#[command(name = "fazt", about = "A single-binary personal platform-as-a-service")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Run the server: HTTPS/HTTP listeners, scheduler, write queue.
	Serve {
		#[arg(long, env = "FAZT_LISTEN", default_value = "0.0.0.0:443")]
		listen: String,
		#[arg(long, env = "FAZT_LISTEN_HTTP")]
		listen_http: Option<String>,
		#[arg(long, env = "FAZT_DATA_DIR", default_value = "./data")]
		data_dir: PathBuf,
		#[arg(long, env = "FAZT_TLS_DIR")]
		tls_dir: Option<PathBuf>,
		#[arg(long, env = "FAZT_ADMIN_USER")]
		admin_user: Option<String>,
		#[arg(long, env = "FAZT_ADMIN_PASSWORD")]
		admin_password: Option<String>,
		#[arg(long, env = "FAZT_BASE_DOMAIN", default_value = "localhost")]
		base_domain: String,
	},
	/// Deploy an app bundle (a zip archive of static assets + manifest).
	Deploy {
		app_id: String,
		bundle: PathBuf,
	},
	/// Manage domain aliases for a hosted app.
	Alias {
		#[command(subcommand)]
		action: AliasAction,
	},
	/// Inspect or revoke active sessions.
	Session {
		#[command(subcommand)]
		action: SessionAction,
	},
	/// Trigger an online backup of the substrate file.
	Backup {
		destination: PathBuf,
	},
}

#[derive(Subcommand)]
enum AliasAction {
	Add { domain: String, label: String, app_id: String },
	Remove { domain: String, label: String },
}

#[derive(Subcommand)]
enum SessionAction {
	List,
	Revoke { session_id: String },
}

#[tokio::main]
async fn main() -> ClResult<()> {
	let cli = Cli::parse();

	match cli.command {
		Command::Serve { listen, listen_http, data_dir, tls_dir, admin_user, admin_password, base_domain } => {
			std::fs::create_dir_all(&data_dir).map_err(Error::Io)?;
			let worker = Arc::new(WorkerPool::new(2, 4, 2));
			let substrate: Arc<dyn fazt_types::substrate::Substrate> =
				Arc::new(SqliteSubstrate::open(&data_dir, worker.clone()).await?);

			let mut builder = Builder::new();
			builder.listen(listen).data_dir(data_dir.into_boxed_path()).worker(worker).substrate(substrate).base_domain(base_domain);
			if let Some(listen_http) = listen_http {
				builder.listen_http(listen_http);
			}
			if let Some(tls_dir) = tls_dir {
				builder.tls_dir(tls_dir.into_boxed_path());
			}
			if let Some(admin_user) = admin_user {
				builder.admin_user(admin_user);
			}
			if let Some(admin_password) = admin_password {
				builder.admin_password(admin_password);
			}
			builder.run().await
		}
		Command::Deploy { .. } => Err(Error::Internal("deploy is not implemented yet".into())),
		Command::Alias { .. } => Err(Error::Internal("alias is not implemented yet".into())),
		Command::Session { .. } => Err(Error::Internal("session is not implemented yet".into())),
		Command::Backup { .. } => Err(Error::Internal("backup is not implemented yet".into())),
	}
}

// vim: ts=4
