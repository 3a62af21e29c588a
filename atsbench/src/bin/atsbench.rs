use atsbench::measurement::PassBand;
use atsbench::store::{InfluxConfig, InfluxStore, MemStore, Store};
use atsbench::time::RunTime;
use atsbench::{info, run, Config};
use clap::{App, Arg};
use color_eyre::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;
    let (config, influx, log_file) = parse_args();

    // the guard must live as long as the process so buffered log lines are
    // flushed
    let _guard = init_tracing(log_file);

    let time = Arc::new(RunTime);
    let store: Arc<dyn Store> = match influx {
        Some(influx) => Arc::new(InfluxStore::new(influx, config.history_window(), time)),
        None => {
            info!("[main] no influxdb configured, keeping runs in memory");
            Arc::new(MemStore::new(time))
        }
    };

    run::serve(config, store).await
}

fn init_tracing(log_file: Option<String>) -> WorkerGuard {
    let (writer, guard) = match log_file {
        Some(log_file) => {
            tracing_appender::non_blocking(tracing_appender::rolling::never(".", log_file))
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .init();
    guard
}

fn parse_args() -> (Config, Option<InfluxConfig>, Option<String>) {
    let matches = App::new("atsbench")
        .version("0.1")
        .about("Drives an automated test bench: measures instrument channels, streams results and persists runs.")
        .arg(
            Arg::with_name("devices")
                .long("devices")
                .value_name("DEVICES")
                .help("number of instruments; device i listens on scpi_port + i - 1")
                .required(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("scpi_host")
                .long("scpi_host")
                .value_name("HOST")
                .help("instrument host; default: localhost")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("scpi_port")
                .long("scpi_port")
                .value_name("PORT")
                .help("instrument base port; default: 5025")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("client_port")
                .long("client_port")
                .value_name("PORT")
                .help("client-facing port; default: 5177")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("pass_band")
                .long("pass_band")
                .value_name("LO:HI")
                .help("pass band bounds in raw ADC counts; default: 6554:45875")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("history_window")
                .long("history_window")
                .value_name("DAYS")
                .help("how many days back the history query looks; default: 30")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("influx_url")
                .long("influx_url")
                .value_name("URL")
                .help("influxdb url; runs are kept in memory if unset")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("influx_token")
                .long("influx_token")
                .value_name("TOKEN")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("influx_org")
                .long("influx_org")
                .value_name("ORG")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("influx_bucket")
                .long("influx_bucket")
                .value_name("BUCKET")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log_file")
                .long("log_file")
                .value_name("FILE")
                .help("write logs to this file instead of stdout")
                .takes_value(true),
        )
        .get_matches();

    let devices = matches
        .value_of("devices")
        .and_then(|devices| devices.parse::<u32>().ok())
        .expect("devices should be a positive number");
    let mut config = Config::new(devices);
    if let Some(host) = matches.value_of("scpi_host") {
        config.set_scpi_host(host);
    }
    if let Some(port) = matches.value_of("scpi_port") {
        config.set_scpi_port(parse_port(port));
    }
    if let Some(port) = matches.value_of("client_port") {
        config.set_client_port(parse_port(port));
    }
    if let Some(band) = matches.value_of("pass_band") {
        config.set_pass_band(parse_pass_band(band));
    }
    if let Some(days) = matches.value_of("history_window") {
        let days = days
            .parse::<u64>()
            .expect("history_window should be a number of days");
        config.set_history_window(Duration::from_secs(days * 24 * 60 * 60));
    }

    let influx = match (
        matches.value_of("influx_url"),
        matches.value_of("influx_token"),
        matches.value_of("influx_org"),
        matches.value_of("influx_bucket"),
    ) {
        (Some(url), Some(token), Some(org), Some(bucket)) => Some(InfluxConfig {
            url: String::from(url),
            token: String::from(token),
            org: String::from(org),
            bucket: String::from(bucket),
        }),
        (None, None, None, None) => None,
        _ => panic!("either all or none of the influx flags must be set"),
    };

    let log_file = matches.value_of("log_file").map(String::from);
    (config, influx, log_file)
}

fn parse_port(port: &str) -> u16 {
    port.parse::<u16>().expect("port should be a number")
}

fn parse_pass_band(band: &str) -> PassBand {
    let mut bounds = band.splitn(2, ':');
    let lo = bounds
        .next()
        .and_then(|lo| lo.parse().ok())
        .expect("pass_band should look like LO:HI");
    let hi = bounds
        .next()
        .and_then(|hi| hi.parse().ok())
        .expect("pass_band should look like LO:HI");
    PassBand::new(lo, hi)
}
