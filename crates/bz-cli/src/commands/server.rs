use anyhow::Result;
use bz_server::auth::AuthConfig;

pub async fn start(
    port: Option<u16>,
    host: Option<String>,
    data_dir: Option<String>,
    config_path: &str,
) -> Result<()> {
    let mut runtime = super::load_runtime_config(config_path)?;
    if let Some(port) = port {
        runtime.server.port = port;
    }
    if let Some(host) = host {
        runtime.server.bind_host = host;
    }
    if let Some(data_dir) = data_dir {
        runtime.data_dir = bz_server::shellexpand(&data_dir);
    }

    let auth = AuthConfig::from_env();
    if let Err(err) = bz_server::check_bind_safety(&runtime.server.bind_host, &auth) {
        eprintln!("startup safety check failed:");
        eprintln!("  {err}");
        eprintln!("hint: run `bz server preflight --config {config_path}`");
        return Err(anyhow::anyhow!("refusing to start unsafe public bind"));
    }

    let bind_host = runtime.server.bind_host.clone();
    let port = runtime.server.port;
    println!("starting Bazaar server...");
    let address = bz_server::bind_address(&bind_host, port);
    println!("  REST: http://{address}/api");
    println!("  live: ws://{address}/api/live/<table>");
    if runtime.is_in_memory() {
        println!("  data: in memory (discarded on exit)");
    } else {
        println!("  data: {}", runtime.database_path().display());
    }

    bz_server::start_server(runtime.into_server_config(auth))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(())
}

pub async fn preflight(config_path: &str) -> Result<()> {
    let runtime = super::load_runtime_config(config_path)?;
    let bind_host = runtime.server.bind_host.clone();
    let auth = AuthConfig::from_env();

    println!("server preflight");
    println!("  bind_host: {bind_host}");
    println!("  BAZAAR_AUTH_TOKEN set: {}", auth.shared_token.is_some());
    println!("  BAZAAR_JWT_SECRET set: {}", auth.jwt_secret.is_some());
    println!(
        "  BAZAAR_ALLOW_INSECURE_BIND: {}",
        bz_server::allow_insecure_bind_from_env()
    );

    match bz_server::check_bind_safety(&bind_host, &auth) {
        Ok(()) => {
            println!("result: PASS");
            Ok(())
        }
        Err(err) => {
            println!("result: FAIL");
            println!("  {err}");
            println!("next steps:");
            println!("  1) Set BAZAAR_AUTH_TOKEN or BAZAAR_JWT_SECRET");
            println!(
                "  2) Or set BAZAAR_ALLOW_INSECURE_BIND=true only for trusted local networks"
            );
            Err(anyhow::anyhow!("bind safety preflight failed"))
        }
    }
}
