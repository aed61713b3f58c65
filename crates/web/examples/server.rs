//! Serves a documents directory.
//!
//! ```text
//! cargo run --example server -- [--level debug] [--route route.txt] [--documents web] [--realm example.com] [addr]
//! cargo run --example server -- --encode user:password [--realm example.com]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use ember_web::auth::encode_password;
use ember_web::handler::handler_fn;
use ember_web::{Server, ServerConfig};
use http::{StatusCode, header};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

struct Args {
    level: Level,
    documents: PathBuf,
    route_file: Option<PathBuf>,
    realm: String,
    encode: Option<String>,
    addr: String,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        level: Level::INFO,
        documents: PathBuf::from("web"),
        route_file: None,
        realm: "example.com".to_owned(),
        encode: None,
        addr: "0.0.0.0:8080".to_owned(),
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| format!("{arg} needs a value"));
        match arg.as_str() {
            "--level" => args.level = value()?.parse().map_err(|e| format!("bad level: {e}"))?,
            "--documents" => args.documents = value()?.into(),
            "--route" => args.route_file = Some(value()?.into()),
            "--realm" => args.realm = value()?,
            "--encode" => args.encode = Some(value()?),
            other if other.starts_with("--") => return Err(format!("unknown option {other}")),
            other => args.addr = other.to_owned(),
        }
    }
    Ok(args)
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(credentials) = &args.encode {
        let Some((user, password)) = credentials.split_once(':') else {
            eprintln!("--encode expects user:password");
            return ExitCode::FAILURE;
        };
        println!("{}", encode_password(user, &args.realm, password));
        return ExitCode::SUCCESS;
    }

    let subscriber = FmtSubscriber::builder().with_max_level(args.level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("cannot install the log subscriber: {e}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(cause = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::builder().documents(&args.documents).realm(&args.realm).build();

    let mut builder = Server::builder().config(config).action("time", |ctx: &mut ember_web::RequestContext<'_>| {
        let now = httpdate::fmt_http_date(std::time::SystemTime::now());
        ctx.conn_mut().set_header(header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref());
        ctx.conn_mut().response(StatusCode::OK, now.as_bytes());
    });
    builder = builder.handler(
        "hello",
        handler_fn(|ctx| {
            ctx.conn_mut().response(StatusCode::OK, b"hello world\r\n");
            true
        }),
    );
    if let Some(route_file) = &args.route_file {
        builder = builder.route_file(route_file);
    }

    let mut server = builder.open()?;
    let addr = server.listen(args.addr.parse()?)?;
    info!(%addr, documents = %args.documents.display(), "ember is running");

    let finished = AtomicBool::new(false);
    server.service_events(&finished)?;
    server.close();
    Ok(())
}
