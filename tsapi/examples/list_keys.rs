use clap::Parser;
use color_eyre::eyre::{bail, Context};
use tsapi::{Auth, Client, IdentityFederation, OAuth};
use tsapi_tokens::{provider, ApiKey, ClientId, ClientSecret};

/// Lists the auth keys of a tailnet
#[derive(Debug, Parser)]
struct Opts {
    /// The API server
    #[arg(long, env = "TS_BASE_URL", default_value = tsapi::DEFAULT_BASE_URL)]
    base_url: reqwest::Url,

    /// The tailnet to list keys for
    #[arg(short, long, env = "TS_TAILNET", default_value = tsapi::DEFAULT_TAILNET)]
    tailnet: String,

    /// A static API key
    #[arg(long, env = "TS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// An OAuth client secret
    #[arg(long, env = "TS_OAUTH_CLIENT_SECRET", hide_env_values = true)]
    oauth_client_secret: Option<String>,

    /// The client ID used with identity federation, or with an OAuth secret
    /// whose ID cannot be derived
    #[arg(long, env = "TS_CLIENT_ID")]
    client_id: Option<String>,

    /// An environment variable holding the workload identity token, read
    /// whenever a new one is needed
    #[arg(long, env = "TS_ID_TOKEN_VAR", default_value = "TS_ID_TOKEN")]
    id_token_var: String,
}

impl Opts {
    fn auth(&self) -> color_eyre::Result<Auth> {
        if let Some(api_key) = &self.api_key {
            return Ok(Auth::ApiKey(ApiKey::new(api_key.clone())));
        }

        if let Some(secret) = &self.oauth_client_secret {
            let mut oauth =
                OAuth::new(ClientSecret::new(secret.clone())).scopes(["auth_keys:read"]);
            if let Some(client_id) = &self.client_id {
                oauth = oauth.client_id(ClientId::new(client_id.clone()));
            }
            return Ok(oauth.into());
        }

        let Some(client_id) = &self.client_id else {
            bail!("one of --api-key, --oauth-client-secret, or --client-id is required");
        };

        let var = self.id_token_var.clone();
        Ok(IdentityFederation::new()
            .client_id(ClientId::new(client_id.clone()))
            .id_token_provider(provider::from_fn(move || std::env::var(&var)))
            .into())
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = Client::builder(opts.auth()?)
        .base_url(opts.base_url.clone())
        .tailnet(opts.tailnet.clone())
        .build()
        .await
        .wrap_err("unable to construct API client")?;

    let keys: serde_json::Value = match client.get(client.build_tailnet_url(["keys"])).await {
        Ok(keys) => keys,
        Err(err) if err.is_not_found() => bail!("tailnet {} was not found", opts.tailnet),
        Err(err) => return Err(err).wrap_err("unable to list keys"),
    };

    tracing::info!(tailnet = %client.tailnet(), "listed keys");
    println!("{}", serde_json::to_string_pretty(&keys)?);

    Ok(())
}
