use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "mesh-cli")]
#[command(about = "Management CLI for a resilient-mesh node", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin API key.
    #[arg(short, long)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Node status, instance health and event bus counters
    Status,
    /// List services and their instances
    Services,
    /// Register an instance of a service
    Register {
        service: String,
        host: String,
        port: u16,
        #[arg(short, long, default_value_t = 1)]
        weight: u32,
    },
    /// Remove an instance (id is host:port)
    Deregister { service: String, instance_id: String },
    /// Probe history of one instance
    Health {
        service: String,
        instance_id: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Circuit breaker states
    Breakers,
    /// Routes with traffic counters
    Routes,
    /// Remove a route by name
    RemoveRoute { name: String },
    /// Recent events of one type
    Events {
        event_type: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');
    let request = |method: Method, path: String| -> RequestBuilder {
        client.request(method, format!("{base}{path}")).headers(headers.clone())
    };

    let builder = match cli.command {
        Commands::Status => request(Method::GET, "/admin/status".into()),
        Commands::Services => request(Method::GET, "/admin/services".into()),
        Commands::Register {
            service,
            host,
            port,
            weight,
        } => request(Method::POST, format!("/admin/services/{service}/instances"))
            .json(&json!({ "host": host, "port": port, "weight": weight })),
        Commands::Deregister {
            service,
            instance_id,
        } => request(
            Method::DELETE,
            format!("/admin/services/{service}/instances/{instance_id}"),
        ),
        Commands::Health {
            service,
            instance_id,
            limit,
        } => request(
            Method::GET,
            format!("/admin/services/{service}/instances/{instance_id}/health?limit={limit}"),
        ),
        Commands::Breakers => request(Method::GET, "/admin/breakers".into()),
        Commands::Routes => request(Method::GET, "/admin/routes".into()),
        Commands::RemoveRoute { name } => request(Method::DELETE, format!("/admin/routes/{name}")),
        Commands::Events { event_type, limit } => {
            request(Method::GET, format!("/admin/events/{event_type}?limit={limit}"))
        }
    };

    print_response(builder.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{status}");
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
