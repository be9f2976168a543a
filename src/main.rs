use anyhow::Result;

#[cfg(windows)]
fn main() -> Result<()> {
    use padroute::config::{EngineConfig, binding_display};
    use padroute::engine::Engine;
    use padroute::interceptor::SystemKeyInterceptor;
    use padroute::platform::win32::{
        RawInputSurface, Win32ForegroundProbe, Win32KeyHook, Win32OutputSink,
        set_control_ctrl_handler,
    };
    use windows::Win32::Media::{timeBeginPeriod, timeEndPeriod};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 1ms timer resolution keeps tap releases close to their deadline
    unsafe { timeBeginPeriod(1) };

    let exit = set_control_ctrl_handler()?;

    let config = EngineConfig::load_or_create("Config.toml")?;
    for binding in config.profile.active_map().into_iter().flat_map(|map| &map.bindings) {
        log::info!("binding: {}", binding_display(binding));
    }

    let engine = Engine::new(
        config.engine_options(),
        config.profile.clone(),
        Box::new(Win32OutputSink::with_vjoy_device(config.vjoy_device_id)),
        Box::new(Win32ForegroundProbe),
    )?;
    engine.start_guard()?;

    let interceptor =
        SystemKeyInterceptor::new(engine.interceptor_core(), Box::new(Win32KeyHook::new()));
    if !interceptor.start() {
        log::warn!("keyboard hook unavailable, keys will not be swallowed");
    }

    let (mut surface, status) = RawInputSurface::start(engine.listener().clone())?;
    log::info!("raw input monitor: {:?}", status);

    let _ = exit.recv();
    log::info!("shutting down");

    interceptor.stop();
    surface.stop();
    engine.shutdown();

    unsafe { timeEndPeriod(1) };
    Ok(())
}

#[cfg(not(windows))]
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::error!("padroute needs Windows for input capture and virtual joystick output");
    std::process::exit(1);
}
