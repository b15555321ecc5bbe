use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use ee_connect::{
    Account, AccountKind, AccountStore, AuthError, AuthorizationSession, BrokerConfig,
    FileAccountStore, FlowConfig, KeyringSecretStore, LocalServerConfig, ProviderConfig,
    SystemBrowser, TokenBroker, TokenClient,
};
use tracing::error;

#[derive(Debug, Parser)]
#[command(
    name = "ee-connect",
    about = "Sign in to Google Earth Engine and print short-lived access tokens."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "EE_CONNECT_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "EE_CONNECT_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Account registry file. Defaults to the per-user config directory.
    #[arg(long, env = "EE_CONNECT_ACCOUNTS_FILE")]
    accounts_file: Option<PathBuf>,

    /// Earth Engine credential file. Defaults to ~/.config/earthengine/credentials.
    #[arg(long, env = "EE_CONNECT_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,

    #[arg(long, env = "EE_CONNECT_GCLOUD", default_value = "gcloud")]
    gcloud: String,

    /// Directory served by the loopback server (index.html and assets).
    #[arg(long)]
    serve_root: Option<PathBuf>,

    /// Seconds to wait for the browser before giving up.
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    #[arg(long, env = "EE_CONNECT_LOG", default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in through the browser and remember the account.
    SignIn,
    /// Forget an account and its stored refresh token.
    SignOut { account: String },
    /// Print an access token for an account.
    Token {
        account: String,
        /// Kind to use when the account is not registered yet.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Service account key file (JSON) for service-account kinds.
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// List known accounts.
    Accounts,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    SignedIn,
    Gcloud,
    CredentialFile,
    ServiceAccount,
}

impl From<KindArg> for AccountKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::SignedIn => AccountKind::OAuthSignedIn,
            KindArg::Gcloud => AccountKind::CliDerived,
            KindArg::CredentialFile => AccountKind::PersistentCredentialFile,
            KindArg::ServiceAccount => AccountKind::ServiceAccountKey,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(err) = run(cli).await {
        error!("{err}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init(),
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

async fn run(cli: Cli) -> Result<(), AuthError> {
    let mut provider = match &cli.client_id {
        Some(client_id) => ProviderConfig::new(client_id.clone()),
        None => ProviderConfig::default(),
    };
    if let Some(secret) = &cli.client_secret {
        provider = provider.with_client_secret(secret.clone());
    }

    let accounts: Arc<dyn AccountStore> = match &cli.accounts_file {
        Some(path) => Arc::new(FileAccountStore::new(path)),
        None => Arc::new(FileAccountStore::default_path()?),
    };
    let mut broker_config = BrokerConfig::default().with_cli_program(cli.gcloud.clone());
    if let Some(path) = &cli.credentials_file {
        broker_config = broker_config.with_credentials_file(path);
    }

    let broker = TokenBroker::new(
        TokenClient::new(provider.clone())?,
        Arc::clone(&accounts),
        Arc::new(KeyringSecretStore::new()),
        broker_config,
    );

    match cli.command {
        Command::SignIn => {
            let mut server = LocalServerConfig::new();
            if let Some(root) = &cli.serve_root {
                server = server.with_serve_root(root);
            }
            let flow = FlowConfig::default()
                .with_timeout(Duration::from_secs(cli.timeout))
                .with_server_config(server);
            let session = Arc::new(AuthorizationSession::new(
                provider,
                flow,
                Arc::new(SystemBrowser),
            ));

            let canceller = Arc::clone(&session);
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceller.cancel();
                }
            });
            eprintln!("Signing in to accounts.google.com (Ctrl-C to cancel)");
            let result = broker.sign_in(&session).await;
            ctrl_c.abort();

            let account = result?;
            println!("{}", account.name);
        }
        Command::SignOut { account } => {
            broker.sign_out(&account)?;
        }
        Command::Token {
            account,
            kind,
            key_file,
        } => {
            let kind = match kind {
                Some(kind) => AccountKind::from(kind),
                None => accounts
                    .get(&account)?
                    .map(|record| record.kind)
                    .ok_or_else(|| AuthError::AccountStore {
                        message: format!("unknown account {account}; pass --kind"),
                    })?,
            };
            let account = match kind {
                AccountKind::ServiceAccountKey => {
                    let path = key_file.ok_or_else(|| AuthError::MissingServiceAccountKey {
                        account: account.clone(),
                    })?;
                    let key = tokio::fs::read_to_string(&path).await?;
                    Account::service_account(account, key)
                }
                kind => Account::new(account, kind),
            };
            let token = broker.access_token(&account).await?;
            println!("{token}");
        }
        Command::Accounts => {
            for account in broker.accounts()? {
                println!("{}\t{}", account.name, account.kind);
            }
        }
    }
    Ok(())
}
