use log::{info, warn};

use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

use wayside::*;
use wayside::input::command::{Command, CommandParser};
use wayside::output::history::{visits, Recorder};

/// Wayside -- vital control engine for one block partition
#[derive(StructOpt, Debug)]
#[structopt(name="wayside")]
struct Opt {
    /// Verbose mode (-v, -vv)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,

    /// Static layout file
    #[structopt(parse(from_os_str))]
    layout: PathBuf,

    /// Relay logic program
    #[structopt(parse(from_os_str))]
    program: PathBuf,

    /// Name of the layout route trains follow
    #[structopt(short = "r", long = "route")]
    route: String,

    /// Managed block range, FIRST-LAST
    #[structopt(short = "p", long = "partition")]
    partition: Partition,

    /// JSON input document
    #[structopt(short = "i", long = "inputs", parse(from_os_str))]
    inputs: PathBuf,

    /// JSON output document, replaced every cycle
    #[structopt(short = "o", long = "outputs", parse(from_os_str))]
    outputs: PathBuf,

    /// Tick period in milliseconds
    #[structopt(long = "period-ms", default_value = "250")]
    period_ms: u64,

    /// Stop after this many cycles
    #[structopt(short = "n", long = "cycles")]
    cycles: Option<u64>,

    /// Blocks checked beyond a switch
    #[structopt(long = "lookahead", default_value = "3")]
    lookahead: usize,

    /// Authority model: external | integrated
    #[structopt(long = "authority-model", default_value = "external")]
    authority_model: AuthorityModel,

    /// Operator commands file
    #[structopt(short = "c", long = "commands", parse(from_os_str))]
    commands: Option<PathBuf>,

    /// Read operator commands from stdin
    #[structopt(long = "console")]
    console: bool,

    /// Output train block visits to file
    #[structopt(long = "visits", parse(from_os_str))]
    visits: Option<PathBuf>,
}

fn operator(handle: MaintenanceHandle, lines: Box<dyn Iterator<Item = String> + Send>) -> AppResult<()> {
    let parser = CommandParser::new()?;
    for line in lines {
        let cmd = match parser.parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => { println!("! {}", e); continue; }
        };
        let reply = match cmd {
            Command::Wait(secs) => {
                std::thread::sleep(Duration::from_millis((secs * 1000.0) as u64));
                continue;
            }
            Command::Maintenance(true) => handle.enter(),
            Command::Maintenance(false) => handle.exit(),
            Command::Switch(b, p) => handle.propose_switch(b, p),
            Command::Light(b, a) => handle.propose_light(b, a),
            Command::Gate(b, g) => handle.propose_gate(b, g),
            Command::Upload(ref path) => match get_program(path) {
                Ok(p) => handle.upload_program(p),
                Err(e) => { println!("! {}: {}", path.display(), e); continue; }
            },
        };
        match reply.recv() {
            Ok(Reply::Accepted) => println!("ok  {}", line.trim()),
            Ok(Reply::Rejected(reason)) => println!("no  {}: {}", line.trim(), reason),
            Err(_) => break,
        }
    }
    Ok(())
}

fn run(opt :&Opt) -> AppResult<()> {
    let layout = get_layout(&opt.layout)?;
    info!("layout: {} blocks, {} routes", layout.blocks.len(), layout.routes.len());
    let program = get_program(&opt.program)?;

    let mut config = EngineConfig::new(opt.partition, &opt.route);
    config.tick = Duration::from_millis(opt.period_ms.max(1));
    config.retry = RetryPolicy::within_tick(config.tick);
    config.lookahead = opt.lookahead;
    config.authority_model = opt.authority_model;

    let surface = FileSurface::new(&opt.inputs, &opt.outputs);
    let mut controller = Controller::new(config, layout, program, surface)?;
    let recorder = Recorder::new();
    if opt.visits.is_some() {
        controller.record_into(&recorder);
    }

    let lines: Option<Box<dyn Iterator<Item = String> + Send>> = if let Some(ref f) = opt.commands {
        let contents = read_file(f)?;
        Some(Box::new(contents.lines().map(|l| l.to_string()).collect::<Vec<_>>().into_iter()))
    } else if opt.console {
        use std::io::BufRead;
        Some(Box::new(std::io::BufReader::new(std::io::stdin()).lines().filter_map(|l| l.ok())))
    } else {
        None
    };
    if let Some(lines) = lines {
        let handle = controller.handle();
        std::thread::spawn(move || {
            if let Err(e) = operator(handle, lines) {
                warn!("operator console stopped: {}", e);
            }
        });
    }

    controller.run(opt.cycles);

    if let Some(ref path) = opt.visits {
        use std::fs::File;
        use std::io::BufWriter;
        use std::io::Write;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(&file);
        let string = visits(&recorder.take())?;
        write!(writer, "{}", string)?;
    }
    Ok(())
}

pub fn main() {
    let opt = Opt::from_args();
    let level = match opt.verbose { 0 => "warn", 1 => "info", _ => "debug" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    match run(&opt) {
        Ok(()) => {},
        Err(e) => {
            println!("Error:\n{}", e.as_fail());
            std::process::exit(1);
        },
    }
}
