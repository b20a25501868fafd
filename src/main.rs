use anyhow::Result;
use crossbeam_channel::Sender;
use log::{error, info};
use pcmflow::core::error::describe_error;
use pcmflow::core::{State, StateHandler};
use pcmflow::player::device_sink::{DEF_LATENCY_US, DEF_RESAMPLE};
use pcmflow::player::{Context, Decoder, DeviceSink, FileSink, OutputMode, Reader};
use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn print_usage() {
    eprintln!("用法:");
    eprintln!("  pcmflow <输入地址> -play <输出设备名>");
    eprintln!("  pcmflow <输入地址> -raw <输出文件>");
    eprintln!("  pcmflow <输入地址> -wav <输出文件>");
}

/// 基础状态回调：记录状态变化，致命错误时关闭上下文促使整条流水线收敛
fn base_handler(name: &'static str, ctxt: Arc<Context>) -> StateHandler {
    Box::new(move |s: &State| {
        info!(
            "[{}] running={} timestamp={}",
            name, s.running, s.timestamp
        );
        if s.error != 0 {
            error!("[{}] 错误 ({}): {}", name, s.error, describe_error(s.error));
            if !s.running {
                ctxt.close();
            }
        }
    })
}

/// 在基础回调之上，离开运行态时通知主线程
fn notify_handler(name: &'static str, ctxt: Arc<Context>, tx: Sender<State>) -> StateHandler {
    let base = base_handler(name, ctxt);
    Box::new(move |s: &State| {
        base(s);
        if !s.running {
            let _ = tx.send(*s);
        }
    })
}

enum Sink {
    File(FileSink),
    Device(DeviceSink),
}

/// 关停流水线
///
/// 先关上下文使句柄失效，期间持续 flush 两条队列打断体内的阻塞等待，
/// 让 stop 有机会在迭代间隙落地
fn shutdown(ctxt: &Arc<Context>, reader: &Reader, decoder: &Decoder) {
    let done = Arc::new(AtomicBool::new(false));
    let kicker = {
        let ctxt = ctxt.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                ctxt.packet_queue().flush();
                ctxt.frame_queue().flush();
                thread::sleep(Duration::from_millis(5));
            }
        })
    };
    ctxt.close();
    reader.stop();
    decoder.stop();
    done.store(true, Ordering::SeqCst);
    let _ = kicker.join();
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        print_usage();
        process::exit(1);
    }
    let url = &args[1];
    let option = &args[2];
    let target = &args[3];

    info!("🎵 pcmflow 启动");

    let ctxt = Arc::new(Context::default());
    if let Err(e) = ctxt.open(url) {
        eprintln!("打开输入失败: {}", e);
        process::exit(1);
    }

    let reader = Reader::new(ctxt.clone());
    let decoder = Decoder::new(ctxt.clone());
    // 回调在状态锁内发送，用无界通道保证非阻塞
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<State>();

    let sink = match option.as_str() {
        "-play" => {
            let sink = DeviceSink::new(ctxt.clone());
            if !sink.open(target) {
                eprintln!(
                    "打开输出设备失败: {} ({})",
                    target,
                    describe_error(sink.state().error)
                );
                process::exit(1);
            }
            if !sink.configure(DEF_RESAMPLE, DEF_LATENCY_US) {
                eprintln!(
                    "协商设备参数失败: {} ({})",
                    target,
                    describe_error(sink.state().error)
                );
                process::exit(1);
            }
            sink.start(Some(notify_handler("DeviceSink", ctxt.clone(), done_tx)));
            Sink::Device(sink)
        }
        "-raw" | "-wav" => {
            let mode = if option == "-raw" {
                OutputMode::Raw
            } else {
                OutputMode::Wav
            };
            let sink = FileSink::new(ctxt.clone());
            if !sink.open(target, mode) {
                eprintln!(
                    "打开输出文件失败: {} ({})",
                    target,
                    describe_error(sink.state().error)
                );
                process::exit(1);
            }
            sink.start(Some(notify_handler("FileSink", ctxt.clone(), done_tx)));
            Sink::File(sink)
        }
        _ => {
            eprintln!("未知选项: {}", option);
            print_usage();
            process::exit(1);
        }
    };

    decoder.start(Some(base_handler("Decoder", ctxt.clone())));
    reader.start(Some(base_handler("Reader", ctxt.clone())));

    // 等待输出端离开运行态（EOS 或致命错误）
    let last = done_rx.recv()?;
    if last.error != 0 {
        error!(
            "流水线因错误结束 ({}): {}",
            last.error,
            describe_error(last.error)
        );
    } else {
        info!("✅ 播放完成 (最后 timestamp={})", last.timestamp);
    }

    shutdown(&ctxt, &reader, &decoder);
    match &sink {
        Sink::File(s) => s.close(),
        Sink::Device(s) => s.close(),
    }

    Ok(())
}
