use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use clap::Parser;
use restbridge_common::manifest::{self, BridgeManifest, MANIFEST_FILE};
use restbridge_runtime::{
    Bridge, CallArg, CallContext, Handle, Headers, OperationState, PayloadKind, PublicIndex,
    RequestOptions, Script, ValueStore,
};
use tracing::{debug, Level};

const TICK: Duration = Duration::from_millis(16);
const ON_RESPONSE: &str = "OnResponse";
const ON_JSON: &str = "OnJson";

/// restbridge: issue HTTP requests through the script bridge and print
/// the callback each one produces.
#[derive(Parser)]
#[command(
    name = "restbridge",
    version,
    about,
    long_about = "restbridge: drive the request bridge from the console.\n\nRequests are issued on the worker pool and delivered back through the tick loop,\nexactly as a script would see them.\n\nExamples:\n  restbridge get https://httpbin.org/get\n  restbridge get https://httpbin.org/json --json\n  restbridge post https://httpbin.org/post '{\"a\":1}' --json -H x-trace:1\n  restbridge check Restbridge.toml"
)]
struct Cli {
    /// Log bridge internals to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Issue a GET request
    Get {
        url: String,

        /// Parse the response as JSON and deliver it as a node handle
        #[arg(long)]
        json: bool,

        /// Extra header, as name:value (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Per-request timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Issue a POST request
    Post {
        url: String,

        /// Request body. With --json it must be valid JSON.
        body: String,

        #[arg(long)]
        json: bool,

        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Validate a Restbridge.toml
    Check {
        /// Manifest path (defaults to the nearest Restbridge.toml)
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Get {
            url,
            json,
            headers,
            timeout_ms,
        } => load_manifest().and_then(|manifest| {
            run_request(&manifest, &url, None, json, &headers, timeout_ms)
        }),
        Command::Post {
            url,
            body,
            json,
            headers,
            timeout_ms,
        } => load_manifest().and_then(|manifest| {
            run_request(&manifest, &url, Some(&body), json, &headers, timeout_ms)
        }),
        Command::Check { path } => run_check(path),
    };

    if let Err(msg) = result {
        eprintln!("{}", msg);
        process::exit(1);
    }
}

fn load_manifest() -> Result<BridgeManifest, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("error: cannot determine current directory: {}", e))?;
    manifest::find_or_default(&cwd).map_err(|e| format!("error: {}", e))
}

// ============================================================================
// restbridge get / post
// ============================================================================

fn run_request(
    manifest: &BridgeManifest,
    url: &str,
    body: Option<&str>,
    json: bool,
    headers: &[String],
    timeout_ms: Option<u64>,
) -> Result<(), String> {
    let headers = parse_headers(headers)?;
    let mut bridge = Bridge::new(manifest).map_err(|e| format!("error: {}", e))?;
    let mut script = ConsoleScript::default();

    let header_set = if headers.is_empty() {
        None
    } else {
        Some(
            bridge
                .register_headers(headers)
                .map_err(|e| format!("error: {}", e))?,
        )
    };
    let options = RequestOptions {
        timeout: timeout_ms.map(Duration::from_millis),
        header_set,
        ..Default::default()
    };
    let request = bridge
        .create_request(url, options)
        .map_err(|e| format!("error: {}", e))?;

    let kind = if json {
        PayloadKind::Structured
    } else {
        PayloadKind::Text
    };
    let callback = match kind {
        PayloadKind::Text => ON_RESPONSE,
        PayloadKind::Structured => ON_JSON,
    };
    bridge
        .register_callback(&script, callback, kind)
        .map_err(|e| format!("error: {}", e))?;

    let issued = match (body, json) {
        (None, false) => bridge.get(request, "", callback),
        (None, true) => bridge.get_json(request, "", callback),
        (Some(body), false) => bridge.post(request, "", body, callback),
        (Some(body), true) => {
            let node = bridge
                .store_mut()
                .parse(body)
                .map_err(|e| format!("error: request body: {}", e))?;
            bridge.post_json(request, "", node, callback)
        }
    };
    let operation = issued.map_err(|e| format!("error: {}", e))?;

    while bridge.operation_state(operation) == Some(OperationState::Pending) {
        thread::sleep(TICK);
        let report = bridge.process_tick(&mut script);
        if report.delivered + report.skipped > 0 {
            debug!(delivered = report.delivered, skipped = report.skipped, "tick");
        }
    }

    bridge.shutdown();
    match script.last_status {
        Some(status) if (200..300).contains(&status) => Ok(()),
        Some(status) => Err(format!("error: request finished with status {}", status)),
        None => Err("error: callback was never delivered".to_string()),
    }
}

fn parse_headers(raw: &[String]) -> Result<Headers, String> {
    raw.iter()
        .map(|header| match header.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(format!(
                "error: invalid header '{}'\n  = help: use name:value",
                header
            )),
        })
        .collect()
}

/// Stand-in for a script VM: exposes the two callbacks the CLI uses and
/// prints whatever they receive.
#[derive(Default)]
struct ConsoleScript {
    last_status: Option<i32>,
}

impl ConsoleScript {
    const PUBLICS: [(&'static str, usize); 2] = [(ON_RESPONSE, 4), (ON_JSON, 3)];
}

impl Script for ConsoleScript {
    fn find_public(&self, name: &str) -> Option<PublicIndex> {
        Self::PUBLICS.iter().position(|(n, _)| *n == name)
    }

    fn public_arity(&self, index: PublicIndex) -> usize {
        Self::PUBLICS[index].1
    }

    fn exec(&mut self, index: PublicIndex, args: &[CallArg], cx: &mut CallContext<'_>) -> i32 {
        let (request, status) = match args {
            [CallArg::Int(request), CallArg::Int(status), ..] => (*request, *status),
            _ => return 1,
        };
        self.last_status = Some(status);
        println!("{}(request={}, status={})", Self::PUBLICS[index].0, request, status);
        match &args[2..] {
            [CallArg::Str(body), CallArg::Int(len)] => {
                println!("{} bytes", len);
                println!("{}", body);
            }
            [CallArg::Handle(handle)] => print_node(cx.store, *handle),
            _ => return 1,
        }
        0
    }
}

fn print_node(store: &ValueStore, handle: Handle) {
    match store.stringify(handle) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("error: {}", e),
    }
}

// ============================================================================
// restbridge check
// ============================================================================

fn run_check(path: Option<PathBuf>) -> Result<(), String> {
    let manifest = match path {
        Some(path) => manifest::load_manifest(&path),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| format!("error: cannot determine current directory: {}", e))?;
            manifest::find_and_load_manifest(&cwd)
        }
    }
    .map_err(|e| format!("error: {}\n  = help: see {} for the expected layout", e, MANIFEST_FILE))?;

    println!(
        "ok: {} worker thread(s), default timeout {} ms",
        manifest.bridge.worker_threads, manifest.bridge.default_timeout_ms
    );
    let mut names: Vec<_> = manifest.endpoints.keys().collect();
    names.sort();
    for name in names {
        println!("  endpoint {} -> {}", name, manifest.endpoints[name].url);
    }
    Ok(())
}
