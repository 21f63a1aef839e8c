/// 多摄像头安全监控 (Sentinel)
///
/// 系统架构:
/// 1. 采集线程: 每个摄像头一个, 拉流与断线重连
/// 2. 监控线程: 每个摄像头一个, 按录像帧率驱动流水线 (检测 → 区域 → 录像)
/// 3. 推流:     观看者通过 StreamPublisher 拉取, 与监控线程共享单帧结果
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use mimalloc::MiMalloc;
use sentinel_rs::camera::{CameraId, CameraRegistry};
use sentinel_rs::config::{AppConfig, Args};
use sentinel_rs::detection::{Detector, DisabledDetector};
use sentinel_rs::input::Connector;
use sentinel_rs::recording::FfmpegSink;
use sentinel_rs::renderer::FrameRenderer;
use sentinel_rs::store::JsonFileStore;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    log::info!("🚀 sentinel starting");
    let config = AppConfig::load(&args.config);
    config.log_summary();

    let detector = build_detector(&args, &config)?;
    let renderer = match &args.font {
        Some(path) => FrameRenderer::from_font_file(path)?,
        None => {
            log::warn!("no font given, labels will not be drawn");
            FrameRenderer::default()
        }
    };

    let registry = Arc::new(CameraRegistry::new(
        config.registry_options(),
        build_connector(&config),
        detector,
        renderer,
        Arc::new(FfmpegSink::default()),
        Arc::new(JsonFileStore::new(&config.store_dir)),
    ));

    for camera in &config.cameras {
        if let Err(e) = registry.add_camera(camera.id, &camera.url) {
            log::error!("failed to add camera {}: {}", camera.id, e);
            continue;
        }
        if let Some(module) = camera.module {
            registry.set_module(camera.id, Some(module))?;
        }
        if let Err(e) = registry.restore(camera.id) {
            log::warn!("camera {}: nothing restored: {}", camera.id, e);
        }
    }

    // 关闭信号: 发送端被丢弃时所有工作线程退出
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
    let period = Duration::from_secs_f64(1.0 / config.recording_fps.max(1) as f64);

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    for id in registry.ids() {
        let registry = Arc::clone(&registry);
        let stop_rx = stop_rx.clone();
        workers.push(
            std::thread::Builder::new()
                .name(format!("monitor-cam{}", id))
                .spawn(move || monitor(&registry, id, period, &stop_rx))?,
        );
    }

    if let Some(path) = args.dump_stream.clone() {
        let registry = Arc::clone(&registry);
        let stop_rx = stop_rx.clone();
        workers.push(
            std::thread::Builder::new()
                .name("dump-stream".to_string())
                .spawn(move || {
                    if let Err(e) = dump_stream(&registry, &path, &stop_rx) {
                        log::error!("stream dump failed: {:#}", e);
                    }
                })?,
        );
    }

    log::info!("✅ {} cameras running", registry.ids().len());
    match args.run_for {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => loop {
            std::thread::park();
        },
    }

    log::info!("shutting down");
    drop(stop_tx);
    for worker in workers {
        if worker.join().is_err() {
            log::error!("worker thread panicked");
        }
    }
    registry.shutdown();
    Ok(())
}

/// 按固定周期驱动流水线, 录像不依赖观看者
fn monitor(registry: &CameraRegistry, id: CameraId, period: Duration, stop_rx: &Receiver<()>) {
    let pipeline = match registry.camera(id) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("monitor: {}", e);
            return;
        }
    };
    let mut was_violation = false;
    loop {
        match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        match pipeline.process() {
            Ok(Some(output)) => {
                if output.violation != was_violation {
                    log::info!(
                        "camera {}: zone violation {}",
                        id,
                        if output.violation { "detected" } else { "cleared" }
                    );
                    was_violation = output.violation;
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("camera {}: {}", id, e),
        }
    }
    log::debug!("monitor for camera {} stopped", id);
}

/// 把第一个摄像头的推流写到文件
fn dump_stream(registry: &CameraRegistry, path: &Path, stop_rx: &Receiver<()>) -> Result<()> {
    let id = registry.ids().first().copied().context("no camera to stream")?;
    let mut stream = registry.stream(id)?;
    let mut file = std::io::BufWriter::new(
        std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
    );
    log::info!("dumping camera {} stream to {}", id, path.display());

    let frames = stream.write_until(&mut file, stop_rx)?;
    file.flush()?;
    log::info!("stream dump stopped after {} frames", frames);
    Ok(())
}

#[cfg(feature = "ffmpeg-native")]
fn build_connector(config: &AppConfig) -> Arc<dyn Connector> {
    Arc::new(sentinel_rs::input::NativeConnector {
        width: config.capture_width,
        height: config.capture_height,
    })
}

#[cfg(not(feature = "ffmpeg-native"))]
fn build_connector(config: &AppConfig) -> Arc<dyn Connector> {
    Arc::new(sentinel_rs::input::FfmpegConnector {
        width: config.capture_width,
        height: config.capture_height,
        ..Default::default()
    })
}

#[cfg(feature = "onnx")]
fn build_detector(args: &Args, config: &AppConfig) -> Result<Arc<dyn Detector>> {
    use sentinel_rs::detection::YoloDetector;

    let Some(model) = &args.model else {
        log::warn!("no model given, detection disabled");
        return Ok(Arc::new(DisabledDetector));
    };
    let names = match &args.labels {
        Some(path) => YoloDetector::load_names(path)?,
        None => Vec::new(),
    };
    let detector = YoloDetector::new(model, names, config.conf_threshold, config.iou_threshold)?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn build_detector(args: &Args, _config: &AppConfig) -> Result<Arc<dyn Detector>> {
    if args.model.is_some() {
        log::warn!("built without the `onnx` feature, model ignored, detection disabled");
    }
    Ok(Arc::new(DisabledDetector))
}
