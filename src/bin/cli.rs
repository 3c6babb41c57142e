//! Postcom command line interface.

use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches, SubCommand,
};
use console::style;
use log::{debug, trace, LevelFilter};
use simplelog::*;

use postcom::{self as pc, Api, SessionStatus, Supervisor};

fn main() {
    println!("[PC] postcom v{}", crate_version!());

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Postcom attaches a terminal emulator to the serial console of a \
            board under test and extracts the postcodes its firmware reports \
            during power-on self-test. Every line received is written, with a \
            timestamp, to a transcript file.\n\
            \n\
            A capture session ends when:\n\
               \t* the terminal code (e3) has been received twice,\n\
               \t* the console stays silent for the inactivity timeout after \
            having produced some output,\n\
               \t* the terminal emulator exits,\n\
               \t* or it is stopped.\n\
            \n\
            `serve` (the default) exposes start/stop/poll/clear and the \
            transcripts over HTTP. `capture` runs a single session in the \
            foreground and prints the postcodes as they arrive.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("PORT")
                .help("the serial device to attach to")
                .short("p")
                .long("port")
                .takes_value(true)
                .default_value("/dev/ttyAMA0")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("b")
                .long("baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("LOG_DIR")
                .help("directory where transcripts are written")
                .short("l")
                .long("log-dir")
                .takes_value(true)
                .default_value("postcode_logs")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TERMINAL")
                .help("terminal emulator command")
                .long_help(
                    "terminal emulator command; `{port}` and `{baud}` are \
                     replaced with the serial device and the baud rate. The \
                     terminal is started in its own process group, and the \
                     whole group is terminated at the end of a session.",
                )
                .short("t")
                .long("terminal")
                .takes_value(true)
                .default_value("minicom -b {baud} -o -D {port}")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TERMINAL_CODE")
                .help("postcode signalling the end of the test")
                .long("terminal-code")
                .takes_value(true)
                .default_value("e3")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("INACTIVITY")
                .help("seconds of silence after which a session stops")
                .long("inactivity")
                .takes_value(true)
                .default_value("60")
                .require_equals(true),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .subcommand(
            SubCommand::with_name("serve")
                .about("serve the capture operations over HTTP (default)")
                .arg(
                    Arg::with_name("LISTEN")
                        .help("address to listen on")
                        .long("listen")
                        .takes_value(true)
                        .default_value("0.0.0.0:5015")
                        .require_equals(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("capture")
                .about("run one capture session in the foreground"),
        )
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'postcom -v -v -v' or 'postcom -vvv' vs 'postcom -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if let Err(e) = TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("{}: could not set up logging: {}", style("warning").yellow(), e);
    }

    trace!("{:#?}", matches);

    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at runtime
    // or the default value

    let baud_rate = numeric_or_exit::<u32>(&matches, "BAUD_RATE", "baud-rate");
    let inactivity = numeric_or_exit::<u64>(&matches, "INACTIVITY", "inactivity");

    let settings = pc::SettingsBuilder::new()
        .port(matches.value_of("PORT").unwrap())
        .baud_rate(baud_rate)
        .log_dir(matches.value_of("LOG_DIR").unwrap())
        .command_template(matches.value_of("TERMINAL").unwrap())
        .terminal_code(matches.value_of("TERMINAL_CODE").unwrap())
        .inactivity_timeout(Duration::from_secs(inactivity))
        .finalize();

    let supervisor = match Supervisor::new(settings) {
        Ok(supervisor) => Arc::new(supervisor),
        Err(e) => {
            println!("{}: {}", style("error").red(), e);
            process::exit(-1);
        }
    };

    // Never leave a terminal attached to the serial port behind us.
    let handler_supervisor = Arc::clone(&supervisor);
    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        handler_supervisor.stop();
        process::exit(0);
    })
    .expect("Failed to install my Ctrl-C handler!");

    let exit_code = match matches.subcommand() {
        ("capture", _) => capture(&supervisor),
        ("serve", Some(sub)) => serve(&supervisor, sub.value_of("LISTEN").unwrap()),
        _ => serve(&supervisor, "0.0.0.0:5015"),
    };
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

fn numeric_or_exit<T: std::str::FromStr>(matches: &ArgMatches, name: &str, long: &str) -> T {
    value_t!(matches.value_of(name), T).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style(long).cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of(name).unwrap()).on_red()
        );
        process::exit(-1);
    })
}

fn serve(supervisor: &Arc<Supervisor>, listen: &str) -> i32 {
    let settings = supervisor.settings();
    println!(
        "[PC] 🔌 {} at {} baud, transcripts in {}",
        style(&settings.port).cyan(),
        settings.baud_rate,
        style(settings.log_dir.display()).cyan()
    );
    println!("[PC] 🌐 serving on http://{}", style(listen).green());

    match pc::server::serve(Api::new(Arc::clone(supervisor)), listen) {
        Ok(()) => 0,
        Err(e) => {
            println!("{}: {}", style("error").red(), e);
            supervisor.stop();
            1
        }
    }
}

fn capture(supervisor: &Supervisor) -> i32 {
    match supervisor.start() {
        Ok(started) => {
            if let Some(path) = &started.transcript {
                println!("[PC] 📝 logging to {}", style(path.display()).cyan());
            }
        }
        Err(e) => {
            println!("{}: {}", style("[PC] 💥 failed to start").red(), e);
            return 1;
        }
    }

    let mut printed = 0;
    loop {
        let snapshot = supervisor.poll();
        for record in snapshot.records.iter().skip(printed) {
            println!(
                "[{}] {}  {}",
                style(&record.timestamp).dim(),
                style(&record.code).green().bold(),
                style(&record.raw_line).dim()
            );
        }
        printed = printed.max(snapshot.records.len());

        if snapshot.status == SessionStatus::Completed {
            println!(
                "[PC] ✅ session completed ({}), {} postcodes",
                snapshot
                    .reason
                    .map_or_else(|| "unknown".to_string(), |r| r.to_string()),
                printed
            );
            supervisor.stop();
            return 0;
        }
        thread::sleep(Duration::from_millis(250));
    }
}
