//! DTC-UTIL - command line access to the DTC
//!
//! Register access, status, data taking and ROC
//! register transactions. Without a driver, the
//! card is simulated (see DTCLIB_SIM_ENABLE).
//!

#[macro_use] extern crate log;
extern crate clap;
extern crate colored;

use std::fs;
use std::process::exit;
use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::thread;
use std::time::{
    Duration,
    Instant,
};

use clap::{
    Args,
    Parser,
    Subcommand,
    ValueEnum,
};
use colored::Colorize;
use indicatif::{
    ProgressBar,
    ProgressStyle,
};

use dtc_dataclasses::Timestamp;
use dtc_dataclasses::errors::DTCError;
use dtc_dataclasses::constants::BUFFER_HEADER_SIZE;

use dtc_lib::DTC;
use dtc_lib::DTCSettings;
use dtc_lib::control;
use dtc_lib::memory::{
    DmaChannel,
    DeviceTransport,
};
use dtc_lib::simulator::{
    parse_ddr_records,
    SimMode,
};

const TEMPLATE_BAR : &str = "[{elapsed_precise}] {bar:60.blue/white} {pos:>7}/{len:7} {msg}";

/// Accept 0x prefixed hex numbers as well as decimals
fn parse_number(value : &str) -> Result<u32, String> {
  let value = value.trim();
  let parsed = match value.strip_prefix("0x").or(value.strip_prefix("0X")) {
    Some(hex) => u32::from_str_radix(hex, 16),
    None      => value.parse::<u32>(),
  };
  parsed.map_err(|err| format!("{value} is not a number! {err}"))
}

fn parse_u16(value : &str) -> Result<u16, String> {
  let number = parse_number(value)?;
  u16::try_from(number).map_err(|_| format!("{value} does not fit into 16 bits!"))
}

#[derive(Parser, Debug)]
#[command(author = "DTC software team", version, about, long_about = None)]
struct Cli {
  /// Read the settings from this toml file
  /// instead of using the defaults
  #[arg(short, long)]
  settings : Option<String>,
  /// Override the simulation mode, same values
  /// as DTCLIB_SIM_ENABLE (e.g. T, C, P, H)
  #[arg(long)]
  sim_mode : Option<String>,
  /// The simulated ROCs do not answer DCS requests
  #[arg(long, default_value_t = false)]
  silent   : bool,
  #[command(subcommand)]
  command  : Command,
}

#[derive(Debug, Subcommand)]
enum Command {
  /// Read a DTC register
  Read(ReadOpts),
  /// Write a DTC register
  Write(WriteOpts),
  /// Print design version, monitoring values and link setup
  Status,
  /// Reset the card
  Reset(ResetOpts),
  /// Request and print events for a range of timestamps
  GetData(DataOpts),
  /// Read a ROC register
  DcsRead(DcsReadOpts),
  /// Write a ROC register
  DcsWrite(DcsWriteOpts),
  /// Loop data through the detector emulator and compare
  BufferTest(BufferTestOpts),
  /// Write the records of a DDR image file into the detector emulator
  WriteDdr(DdrOpts),
  /// Read the detector emulator data back and compare it to a DDR image file
  VerifyDdr(DdrOpts),
  /// Send readout/data requests for a range of timestamps in the background
  /// and read the events
  SendRange(DataOpts),
  /// Write the current settings to a toml file
  DumpSettings(DumpOpts),
}

#[derive(Debug, Args)]
struct ReadOpts {
  /// Register address
  #[arg(required = true, value_parser = parse_u16)]
  address : u16,
}

#[derive(Debug, Args)]
struct WriteOpts {
  /// Register address
  #[arg(required = true, value_parser = parse_u16)]
  address : u16,
  /// Value to write
  #[arg(required = true, value_parser = parse_number)]
  value   : u32,
  /// Read the register back and compare
  #[arg(long, default_value_t = false)]
  checked : bool,
}

#[derive(Debug, Copy, Clone, PartialEq, ValueEnum)]
enum ResetKind {
  Soft,
  Hard,
  Serdes,
}

#[derive(Debug, Args)]
struct ResetOpts {
  #[arg(value_enum, default_value_t = ResetKind::Soft)]
  kind : ResetKind,
}

#[derive(Debug, Args)]
struct DataOpts {
  /// First timestamp
  #[arg(long, default_value_t = 0)]
  start         : u64,
  /// Number of timestamps
  #[arg(short, long, default_value_t = 1)]
  count         : u64,
  /// Print every event
  #[arg(short, long, default_value_t = false)]
  print         : bool,
  /// Show a progress bar
  #[arg(long, default_value_t = false)]
  show_progress : bool,
}

#[derive(Debug, Args)]
struct DcsReadOpts {
  #[arg(short, long, default_value_t = 0)]
  link     : u8,
  #[arg(short, long, default_value_t = 0)]
  roc      : u8,
  /// ROC register address
  #[arg(required = true, value_parser = parse_u16)]
  address  : u16,
  /// Read this many consecutive registers with a block read
  #[arg(long)]
  block    : Option<u16>,
  /// Register block for an extended register read
  #[arg(long, value_parser = parse_u16)]
  ext      : Option<u16>,
}

#[derive(Debug, Args)]
struct DcsWriteOpts {
  #[arg(short, long, default_value_t = 0)]
  link     : u8,
  #[arg(short, long, default_value_t = 0)]
  roc      : u8,
  /// ROC register address
  #[arg(required = true, value_parser = parse_u16)]
  address  : u16,
  /// Value to write
  #[arg(required = true, value_parser = parse_u16)]
  data     : u16,
  /// Ask the ROC to acknowledge the write
  #[arg(long, default_value_t = false)]
  ack      : bool,
}

#[derive(Debug, Args)]
struct BufferTestOpts {
  /// Number of buffers
  #[arg(short, long, default_value_t = 100)]
  count : usize,
  /// Payload size in bytes
  #[arg(short, long, default_value_t = 256)]
  size  : usize,
}

#[derive(Debug, Args)]
struct DdrOpts {
  /// DDR image file (records with a leading
  /// 8 byte inclusive byte count)
  #[arg(required = true)]
  file  : String,
  /// Write the image before reading it back
  #[arg(long, default_value_t = false)]
  write : bool,
}

#[derive(Debug, Args)]
struct DumpOpts {
  #[arg(required = true)]
  file : String,
}

fn progress_bar(len : u64, show : bool) -> Option<ProgressBar> {
  if !show {
    return None;
  }
  let bar = ProgressBar::new(len);
  match ProgressStyle::with_template(TEMPLATE_BAR) {
    Ok(style) => bar.set_style(style),
    Err(err)  => error!("Unable to set progressbar style! {err}"),
  }
  Some(bar)
}

fn ddr_payloads(filename : &str) -> Result<Vec<Vec<u8>>, DTCError> {
  let bytes = match fs::read(filename) {
    Ok(b)    => b,
    Err(err) => {
      error!("Unable to read {}! {err}", filename);
      return Err(DTCError::IoError);
    }
  };
  let records = parse_ddr_records(&bytes)?;
  Ok(records.into_iter().map(|r| r[BUFFER_HEADER_SIZE..].to_vec()).collect())
}

fn write_ddr(dtc : &DTC, payloads : &[Vec<u8>]) -> Result<(), DTCError> {
  for payload in payloads {
    dtc.write_detector_emulator_data(payload)?;
  }
  debug!("Wrote {} records to the detector emulator", payloads.len());
  Ok(())
}

/// Read one buffer per payload from the DAQ channel
/// and compare, returns the number of mismatches
fn verify_buffers(dtc : &DTC, payloads : &[Vec<u8>], bar : Option<&ProgressBar>) -> Result<usize, DTCError> {
  let timeout = dtc.settings().read_timeout_ms.max(10);
  let mut nbad = 0usize;
  for (k, payload) in payloads.iter().enumerate() {
    let buffer = dtc.device().read_data(DmaChannel::DAQ, timeout)?;
    if buffer.is_empty() {
      error!("No data for record {}!", k);
      nbad += payloads.len() - k;
      break;
    }
    if buffer.payload() != payload.as_slice() {
      error!("Record {} differs! Got {} bytes, expected {}", k, buffer.payload().len(), payload.len());
      nbad += 1;
    }
    dtc.device().read_release(DmaChannel::DAQ, 1)?;
    if let Some(b) = bar {
      b.inc(1);
    }
  }
  Ok(nbad)
}

/// Fill a payload with a counter, so a shifted
/// or truncated buffer shows up
fn test_pattern(k : usize, size : usize) -> Vec<u8> {
  (0..size).map(|j| ((j + 7*k) % 251) as u8).collect()
}

fn get_data(dtc : &DTC, opts : &DataOpts, stop : &AtomicBool) -> Result<(), DTCError> {
  let bar = progress_bar(opts.count, opts.show_progress);
  let mut nblocks = 0usize;
  let mut nbytes  = 0usize;
  let start       = Instant::now();
  for k in 0..opts.count {
    if stop.load(Ordering::Relaxed) {
      warn!("Interrupted after {} timestamps", k);
      break;
    }
    let ts    = Timestamp::new(opts.start + k);
    let event = dtc.get_data(Some(ts))?;
    nblocks  += event.n_blocks();
    nbytes   += event.size();
    if opts.print {
      println!("{}", event);
    }
    dtc.release_buffers()?;
    if let Some(b) = &bar {
      b.inc(1);
    }
  }
  if let Some(b) = bar {
    b.finish_with_message("done");
  }
  let elapsed = start.elapsed().as_secs_f64();
  println!("==> Read {} blocks with {} bytes in {:.3} s", nblocks, nbytes, elapsed);
  Ok(())
}

fn send_range(dtc : &DTC, opts : &DataOpts, stop : &AtomicBool) -> Result<(), DTCError> {
  let bar = progress_bar(opts.count, opts.show_progress);
  dtc.start_range_requests(Timestamp::new(opts.start), opts.count)?;
  let mut nevents = 0u64;
  let mut idle    = Instant::now();
  while nevents < opts.count && !stop.load(Ordering::Relaxed) {
    let event = dtc.read_event()?;
    if event.is_empty() {
      if idle.elapsed() > Duration::from_secs(2) {
        warn!("No data for 2 seconds, giving up after {} events", nevents);
        break;
      }
      thread::sleep(Duration::from_millis(1));
      continue;
    }
    idle = Instant::now();
    nevents += 1;
    if opts.print {
      println!("{}", event);
    }
    dtc.release_buffers()?;
    if let Some(b) = &bar {
      b.inc(1);
    }
  }
  let nsent = dtc.stop_range_requests()?;
  if let Some(b) = bar {
    b.finish_with_message("done");
  }
  println!("==> Sent requests for {} timestamps, read {} events", nsent, nevents);
  Ok(())
}

fn run(dtc : &DTC, command : &Command, stop : &AtomicBool) -> Result<(), DTCError> {
  match command {
    Command::Read(opts) => {
      let value = dtc.read_register(opts.address)?;
      println!("{:#06x} : {:#010x}", opts.address, value);
    }
    Command::Write(opts) => {
      if opts.checked {
        dtc.write_register_checked(opts.address, opts.value)?;
      } else {
        dtc.write_register(opts.address, opts.value)?;
      }
      println!("{:#06x} <- {:#010x}", opts.address, opts.value);
    }
    Command::Status => {
      println!("{}", dtc.status()?);
    }
    Command::Reset(opts) => {
      match opts.kind {
        ResetKind::Soft   => control::soft_reset(dtc.device())?,
        ResetKind::Hard   => control::hard_reset(dtc.device())?,
        ResetKind::Serdes => control::serdes_reset(dtc.device())?,
      }
      println!("==> {:?} reset done", opts.kind);
    }
    Command::GetData(opts) => {
      get_data(dtc, opts, stop)?;
    }
    Command::SendRange(opts) => {
      send_range(dtc, opts, stop)?;
    }
    Command::DcsRead(opts) => {
      if let Some(block) = opts.ext {
        let value = dtc.read_ext_roc_register(opts.link, opts.roc, block, opts.address)?;
        println!("link {} roc {} block {} {:#06x} : {:#06x}", opts.link, opts.roc, block, opts.address, value);
      } else if let Some(nwords) = opts.block {
        let words = dtc.read_roc_block(opts.link, opts.roc, opts.address, nwords)?;
        for (k, word) in words.iter().enumerate() {
          println!("link {} roc {} {:#06x} : {:#06x}", opts.link, opts.roc,
                   opts.address.wrapping_add(k as u16), word);
        }
      } else {
        let value = dtc.read_roc_register(opts.link, opts.roc, opts.address)?;
        println!("link {} roc {} {:#06x} : {:#06x}", opts.link, opts.roc, opts.address, value);
      }
    }
    Command::DcsWrite(opts) => {
      dtc.write_roc_register(opts.link, opts.roc, opts.address, opts.data, opts.ack)?;
      println!("link {} roc {} {:#06x} <- {:#06x}", opts.link, opts.roc, opts.address, opts.data);
    }
    Command::BufferTest(opts) => {
      let bar = progress_bar(opts.count as u64, true);
      let mut payloads = Vec::<Vec<u8>>::with_capacity(opts.count);
      for k in 0..opts.count {
        payloads.push(test_pattern(k, opts.size));
      }
      // the card only holds so many buffers,
      // go in chunks of 4
      let mut nbad = 0usize;
      for chunk in payloads.chunks(4) {
        if stop.load(Ordering::Relaxed) {
          break;
        }
        write_ddr(dtc, chunk)?;
        nbad += verify_buffers(dtc, chunk, bar.as_ref())?;
      }
      if let Some(b) = bar {
        b.finish_with_message("done");
      }
      if nbad > 0 {
        println!("==> {}", format!("{} of {} buffers are corrupted!", nbad, opts.count).red().bold());
      } else {
        println!("==> {}", format!("All {} buffers OK", opts.count).green());
      }
    }
    Command::WriteDdr(opts) => {
      let payloads = ddr_payloads(&opts.file)?;
      write_ddr(dtc, &payloads)?;
      println!("==> Wrote {} records to the detector emulator", payloads.len());
    }
    Command::VerifyDdr(opts) => {
      let payloads = ddr_payloads(&opts.file)?;
      if opts.write {
        write_ddr(dtc, &payloads)?;
      }
      let bar  = progress_bar(payloads.len() as u64, true);
      let nbad = verify_buffers(dtc, &payloads, bar.as_ref())?;
      if nbad > 0 {
        println!("==> {}", format!("{} of {} records differ!", nbad, payloads.len()).red().bold());
      } else {
        println!("==> {}", format!("All {} records match {}", payloads.len(), opts.file).green());
      }
    }
    Command::DumpSettings(opts) => {
      dtc.settings().to_toml(opts.file.clone());
    }
  }
  Ok(())
}

fn main() {
  dtc_lib::init_env_logger();

  let cli = Cli::parse();
  let mut settings = match &cli.settings {
    None           => DTCSettings::from_env(),
    Some(filename) => {
      match DTCSettings::from_toml(filename.clone()) {
        Ok(s)    => s,
        Err(err) => {
          error!("Unable to load settings from {}! {err}", filename);
          exit(1);
        }
      }
    }
  };
  if let Some(mode) = &cli.sim_mode {
    match SimMode::from_env_str(mode) {
      Some(m) => settings.simulator.mode = m,
      None    => {
        error!("Unknown simulation mode {}!", mode);
        exit(1);
      }
    }
  }
  if cli.silent {
    settings.simulator.silent = true;
  }
  debug!("Using settings {}", settings);

  let stop = Arc::new(AtomicBool::new(false));
  match signal_hook::flag::register(signal_hook::consts::SIGINT, stop.clone()) {
    Err(err) => warn!("Unable to install SIGINT handler! {err}"),
    Ok(_)    => ()
  }

  let dtc = match DTC::new(settings) {
    Ok(d)    => d,
    Err(err) => {
      println!("==> {}", format!("Unable to open the DTC! {err}").red().bold());
      exit(1);
    }
  };
  if let Some(sim) = dtc.simulator() {
    println!("==> Running against the simulated card ({})", sim.mode());
  }
  match run(&dtc, &cli.command, &stop) {
    Err(err) => {
      error!("{:?} failed! {err}", cli.command);
      exit(1);
    }
    Ok(_) => ()
  }
}
