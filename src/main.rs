#![forbid(unsafe_code)]

use std::time::Duration;

use lazy_static::lazy_static;
use log::info;
use poem::listener::{Listener, TcpListener};
use poem::{Route, Server};
use poem_openapi::OpenApiService;

// Greeter Utilities
use crate::api::greet::GreetApi;
use crate::utils::config::{init_log, init_runtime_context, RuntimeCtx, GREETER_ARGS};
use crate::utils::errors::Errors;
use crate::utils::shutdown::shutdown_signal;

// Modules
mod api;
mod utils;

// ***************************************************************************
//                                Constants
// ***************************************************************************
const SERVER_NAME : &str = "GreeterServer"; // for poem logging
const API_TITLE   : &str = "Greeter Server";
const API_VERSION : Option<&str> = option_env!("CARGO_PKG_VERSION");

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Lazily initialize the parameters variable so that is has a 'static lifetime.
// We exit if we can't read our parameters or create the data directories.
lazy_static! {
    static ref RUNTIME_CTX: RuntimeCtx = init_runtime_context();
}

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    // Describe the api without touching the data directories.
    if GREETER_ARGS.print_spec {
        println!("{}", greeter_service(API_TITLE).spec_yaml());
        return Ok(());
    }

    // --------------- Initialize Greeter -------------
    // Announce ourselves.
    println!("Starting greeter_server!");

    // Initialize the server.
    greeter_init();
    if GREETER_ARGS.create_dirs_only {
        info!("Data directories are in place under {}.", RUNTIME_CTX.greeter_dirs.root_dir);
        return Ok(());
    }

    // --------------- Main Loop Set Up ---------------
    let config = &RUNTIME_CTX.parms.config;
    let app = greeter_routes(&config.title);
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);

    // Bind before announcing so a port conflict fails here.
    let acceptor = TcpListener::bind(config.bind_addr()).into_acceptor().await?;
    info!("Greeter server running on port {}", config.http_port);

    // ------------------ Main Loop -------------------
    Server::new_with_acceptor(acceptor)
        .name(SERVER_NAME)
        .run_with_graceful_shutdown(app, shutdown_signal(), Some(shutdown_timeout))
        .await?;

    info!("greeter_server stopped.");
    Ok(())
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// greeter_init:
// ---------------------------------------------------------------------------
/** Initialize logging and the runtime context.  The data directories are
 * created as a side effect of initializing the log.
 */
fn greeter_init() {
    // Configure our log.
    init_log();

    // Force the reading of input parameters and initialization of runtime context.
    info!("{}", Errors::InputParms(format!("{:#?}", *RUNTIME_CTX)));

    // Log build info.
    print_version_info();
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    info!("*** Running {}={}",
          option_env!("CARGO_PKG_NAME").unwrap_or("greeter_server"),
          API_VERSION.unwrap_or("unknown"));
}

// ---------------------------------------------------------------------------
// greeter_service:
// ---------------------------------------------------------------------------
fn greeter_service(title: &str) -> OpenApiService<GreetApi, ()> {
    OpenApiService::new(GreetApi, title, API_VERSION.unwrap_or("unknown"))
}

// ---------------------------------------------------------------------------
// greeter_routes:
// ---------------------------------------------------------------------------
/** The single POST / endpoint is the whole http surface. */
fn greeter_routes(title: &str) -> Route {
    Route::new().nest("/", greeter_service(title))
}
