// RustPixel
// copyright zipxing@hotmail.com 2022～2025

/// readback-demo, a headless capture scene
///
/// Each frame a camera texture is redrawn and a one float compute buffer gets
/// the current time. Both are read back through a command list attached to
/// the host, the way a camera capture pass would be.
///
/// Usage:
/// readback-demo
/// readback-demo -f 120 -b plugin
/// readback-demo -c readback.toml --png last_frame.png
///
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{error, info};
use pixel_readback::{
    BackendPreference, BufferHandle, CommandList, HeadlessHost, PluginApi, Readback,
    ReadbackConfig, RequestId, Result, TextureFormat, TextureHandle,
};
use std::cell::RefCell;
use std::rc::Rc;

const FRAME_TIME: f32 = 1.0 / 60.0;

fn make_parser() -> ArgMatches {
    Command::new("readback-demo")
        .author("zipxing@hotmail.com")
        .about("async gpu readback demo, headless")
        .arg(
            Arg::new("frames")
                .short('f')
                .long("frames")
                .default_value("60")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("backend")
                .short('b')
                .long("backend")
                .value_parser(["auto", "native", "plugin"]),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .default_value("64")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .default_value("32")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(Arg::new("config").short('c').long("config"))
        .arg(Arg::new("png").long("png"))
        .arg(
            Arg::new("stdout")
                .long("stdout")
                .action(ArgAction::SetTrue)
                .help("print results instead of only logging them"),
        )
        .get_matches()
}

/// where the scene draws, host memory or the plugin's device
enum Target {
    Host,
    #[cfg(feature = "linked-plugin")]
    Device(readback_plugin::SoftDevice),
}

struct Scene {
    target: Target,
    camera: TextureHandle,
    compute: BufferHandle,
}

impl Scene {
    fn new(rb: &mut Readback<HeadlessHost>, plugin: bool, w: u32, h: u32) -> Result<Self> {
        let pixels = vec![0u8; (w * h * 4) as usize];
        if !plugin {
            let camera = rb.host_mut().create_texture(w, h, TextureFormat::Rgba32, &pixels);
            let compute = rb.host_mut().create_buffer(1, 4, &[0; 4]);
            return Ok(Self {
                target: Target::Host,
                camera,
                compute,
            });
        }
        #[cfg(feature = "linked-plugin")]
        {
            use readback_plugin::{ffi, format, Renderer, SoftDevice};
            let dev = SoftDevice::new(Renderer::OpenGLES30);
            dev.set_latency(1);
            ffi::install_device(Box::new(dev.clone()));
            let tex = dev.create_texture(format::RGBA8, w as i32, h as i32, &pixels);
            let buf = dev.create_buffer(&[0; 4]);
            Ok(Self {
                camera: TextureHandle::new(tex as u64, w, h, TextureFormat::Rgba32),
                compute: BufferHandle::new(buf as u64, 1, 4),
                target: Target::Device(dev),
            })
        }
        #[cfg(not(feature = "linked-plugin"))]
        {
            let _ = rb;
            Err(pixel_readback::ReadbackError::Config(
                "plugin backend needs the linked-plugin feature".to_string(),
            ))
        }
    }

    /// moving gradient plus the time the compute pass would write
    fn draw(&self, rb: &mut Readback<HeadlessHost>, frame: u32) -> Result<()> {
        let (w, h) = (self.camera.width, self.camera.height);
        let mut pixels = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let r = ((x + frame) * 255 / w.max(1)) as u8;
                let g = (y * 255 / h.max(1)) as u8;
                pixels.extend_from_slice(&[r, g, (frame % 256) as u8, 255]);
            }
        }
        let time = (frame as f32 * FRAME_TIME).to_ne_bytes();
        match &self.target {
            Target::Host => {
                rb.host_mut().write_texture(self.camera.native, &pixels)?;
                rb.host_mut().write_buffer(self.compute.native, 0, &time)?;
            }
            #[cfg(feature = "linked-plugin")]
            Target::Device(dev) => {
                let device_err = |e: readback_plugin::DeviceError| {
                    pixel_readback::ReadbackError::Plugin(e.to_string())
                };
                dev.write_texture(self.camera.native as u32, &pixels)
                    .map_err(device_err)?;
                dev.write_buffer(self.compute.native as u32, 0, &time)
                    .map_err(device_err)?;
            }
        }
        Ok(())
    }
}

fn plugin_for(config: &ReadbackConfig) -> Option<Rc<dyn PluginApi>> {
    #[cfg(feature = "linked-plugin")]
    if config.backend != BackendPreference::Native {
        return Some(Rc::new(pixel_readback::LinkedPlugin));
    }
    let _ = config;
    None
}

#[cfg(feature = "image")]
fn save_png(path: &str, w: u32, h: u32, data: &[u8]) {
    match image::RgbaImage::from_raw(w, h, data.to_vec()) {
        Some(img) => match img.save(path) {
            Ok(()) => info!("saved {}", path),
            Err(e) => error!("save {}: {}", path, e),
        },
        None => error!("captured {} bytes, not a {}x{} frame", data.len(), w, h),
    }
}

fn run(args: &ArgMatches) -> Result<()> {
    let mut config = match args.get_one::<String>("config") {
        Some(path) => ReadbackConfig::load(path)?,
        None => ReadbackConfig::default(),
    };
    if let Some(b) = args.get_one::<String>("backend") {
        config.backend = b.parse()?;
    }
    pixel_readback::log::init_log(config.level_filter()?, &config.log.file)?;

    let frames = *args.get_one::<u32>("frames").unwrap_or(&60);
    let w = *args.get_one::<u32>("width").unwrap_or(&64);
    let h = *args.get_one::<u32>("height").unwrap_or(&32);
    let stdout = args.get_flag("stdout");

    let use_plugin = config.backend == BackendPreference::Plugin;
    let host = HeadlessHost::new(!use_plugin, true);
    let plugin = plugin_for(&config);
    let mut rb = Readback::new(host, plugin, &config);
    let scene = Scene::new(&mut rb, use_plugin, w, h)?;

    let captured = Rc::new(RefCell::new(0usize));
    let c = captured.clone();
    let mut list = CommandList::new("camera");
    let camera_id: RequestId =
        rb.request_texture_deferred(&mut list, scene.camera, 0, false, move |req, _| {
            if req.done() {
                let len = req.get_data::<u8>().map_or(0, |d| d.len());
                info!("first camera frame captured, {} bytes", len);
                *c.borrow_mut() = len;
            }
        })?;
    let compute_id = rb.request_buffer_deferred(&mut list, scene.compute, false, |req, _| {
        if let Ok(v) = req.get_data::<f32>() {
            info!("first time from compute: {:?}", v.first());
        }
    })?;
    rb.host_mut().attach(list);

    for frame in 0..frames {
        scene.draw(&mut rb, frame)?;
        let stats = rb.update();
        let time = rb
            .get(compute_id)
            .and_then(|r| r.get_data::<f32>().ok())
            .and_then(|v| v.first().copied());
        if let Some(t) = time {
            info!("frame {} time from compute {:.3} ({:?})", frame, t, stats);
            if stdout {
                println!("frame {:>4}  time from compute {:.3}", frame, t);
            }
        }
    }

    if let Some(req) = rb.get(camera_id) {
        info!("camera capture {:?}, first frame {} bytes", req.state(), captured.borrow());
        #[cfg(feature = "image")]
        if let (Some(path), Ok(data)) = (args.get_one::<String>("png"), req.get_data::<u8>()) {
            save_png(path, w, h, data);
        }
    }
    #[cfg(not(feature = "image"))]
    if args.get_one::<String>("png").is_some() {
        error!("--png needs the image feature");
    }

    rb.host_mut().detach("camera");
    rb.shutdown();
    Ok(())
}

fn main() {
    let args = make_parser();
    if let Err(e) = run(&args) {
        error!("readback-demo: {}", e);
        eprintln!("readback-demo: {}", e);
        std::process::exit(1);
    }
}
