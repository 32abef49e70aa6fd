#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::{
    fs::{self, File},
    sync::Arc,
};

use clap::Parser;
use rvk::{
    debug::VulkanLogLevel,
    device::Device,
    instance::{Instance, InstanceConfig, InstanceExtensions, VkVersion},
    surface::Surface,
};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::ControlFlow,
    window::{Window as WinitWindow, WindowAttributes},
};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Info,
    Debug,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            //We clamp this to the lowest possible level but this shouldn't happen
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(clap::Parser, Debug)]
struct CliArgs {
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    /// Minimum severity for Vulkan validation messages. When absent,
    /// diagnostics default to warnings-and-up on debug builds and stay
    /// off entirely on release builds.
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => VulkanLogLevel::Error,
        }
    }
}

fn main() -> eyre::Result<()> {
    let app_dirs = directories::ProjectDirs::from("", "parengus", "tri-app");

    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let cli_args = CliArgs::parse();

    if cli_args.tracing_log_level != TracingLogLevel::Off {
        fs::create_dir_all(&log_dir)?;

        let mut log_file_path = log_dir.clone();
        log_file_path.push("log-file");
        log_file_path.set_extension("txt");
        let log_file = File::create(&log_file_path)?;
        let file_log = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false);

        println!("log_file_path: {}", log_file_path.display());
        println!("cli_args: {:#?}", cli_args);

        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                        cli_args.tracing_log_level.into(),
                    ))
                    .and_then(file_log),
            )
            .init();
    }

    let event_loop = winit::event_loop::EventLoop::builder().build()?;

    let diagnostics = match cli_args.graphics_debug_level {
        Some(level) => Some(level.into()),
        // Mirror a debug/release build switch when nothing is given on
        // the command line.
        None if cfg!(debug_assertions) => Some(VulkanLogLevel::Warning),
        None => None,
    };

    let instance_config = InstanceConfig {
        app_name: "tri-app".to_owned(),
        app_version: VkVersion::new(0, 0, 1, 0),
        engine_name: "rvk".to_owned(),
        engine_version: VkVersion::new(0, 0, 1, 0),
        diagnostics,
    };

    //SAFETY: Loads vulkan via libloading which is kinda unsafe but we're fine
    let instance = Arc::new(unsafe {
        Instance::new(
            &instance_config,
            Some(&event_loop),
            InstanceExtensions { surface: true },
        )
    }?);

    let mut app = AppRunner {
        state: Some(App::Initializing(InitializingState { instance })),
        failure: None,
    };

    tracing::trace!("Entering main event loop");
    event_loop.run_app(&mut app)?;

    // Failures inside the event loop callbacks are recorded rather than
    // unwound; surface them as the process exit status here.
    match app.failure {
        Some(report) => Err(report),
        None => Ok(()),
    }
}

#[derive(Debug)]
struct AppRunner {
    state: Option<App>,
    failure: Option<eyre::Report>,
}

#[derive(Debug)]
enum App {
    Running(RunningState),
    Initializing(InitializingState),
    Suspended(SuspendedState),
    Exiting(ExitingState),
}

#[derive(Debug)]
struct InitializingState {
    instance: Arc<Instance>,
}
#[derive(Debug)]
struct RunningState {
    instance: Arc<Instance>,
    win: Arc<WinitWindow>,
    // Field order matters for drop order: the device is released
    // before the surface, and both keep the instance alive through
    // their own Arcs.
    device: Arc<Device>,
    _surface: Arc<Surface<WinitWindow>>,
}
#[derive(Debug)]
struct SuspendedState {
    instance: Arc<Instance>,
    win: Arc<WinitWindow>,
    device: Arc<Device>,
}
#[derive(Debug)]
struct ExitingState {}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        assert!(self.state.is_some());
        if let Some(initializing_state) = self.take_initializing() {
            event_loop.set_control_flow(ControlFlow::Poll);
            let win = Arc::new(
                match event_loop.create_window(
                    WindowAttributes::default()
                        .with_title("tri-app")
                        .with_inner_size(LogicalSize {
                            width: 800,
                            height: 600,
                        }),
                ) {
                    Ok(w) => w,
                    Err(e) => {
                        tracing::error!("Error while creating window: {}", e);
                        self.fail_to_exiting("Initializing", event_loop, eyre::Report::new(e));
                        return;
                    }
                },
            );
            //SAFETY: We will drop surface when we enter into `suspend`
            let surface = Arc::new(
                match unsafe { Surface::new(&initializing_state.instance, Arc::clone(&win)) } {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("Error while creating surface: {}", e);
                        self.fail_to_exiting("Initializing", event_loop, eyre::Report::new(e));
                        return;
                    }
                },
            );

            let device =
                match Device::create_compatible(&initializing_state.instance, &surface) {
                    Ok(d) => Arc::new(d),
                    Err(e) => {
                        tracing::error!("Error while creating device: {}", e);
                        self.fail_to_exiting("Initializing", event_loop, eyre::Report::new(e));
                        return;
                    }
                };

            tracing::info!(
                "Queues ready: graphics family {}, present family {}{}",
                device.graphics_queue_family(),
                device.present_queue_family(),
                if device.has_unified_queue() {
                    " (one shared queue)"
                } else {
                    ""
                }
            );

            tracing::debug!("State transition: Initializing -> Running");
            self.set_running(RunningState {
                instance: initializing_state.instance,
                win,
                device,
                _surface: surface,
            });
        } else if let Some(suspended_state) = self.take_suspended() {
            event_loop.set_control_flow(ControlFlow::Poll);
            //SAFETY: We will drop surface when we enter into `suspend`
            let surface = Arc::new(
                match unsafe {
                    Surface::new(&suspended_state.instance, Arc::clone(&suspended_state.win))
                } {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("Error while creating surface: {}", e);
                        self.fail_to_exiting("Suspended", event_loop, eyre::Report::new(e));
                        return;
                    }
                },
            );

            tracing::debug!("State transition: Suspended -> Running");
            self.set_running(RunningState {
                instance: suspended_state.instance,
                win: suspended_state.win,
                device: suspended_state.device,
                _surface: surface,
            });
        } else if self.is_exiting() {
            tracing::warn!("resumed() called while in Exiting state");
        }
    }

    fn suspended(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        assert!(self.state.is_some());
        if let Some(running_state) = self.take_running() {
            event_loop.set_control_flow(ControlFlow::Wait);
            let RunningState {
                instance,
                win,
                device,
                _surface: _,
            } = running_state;

            if let Err(e) = device.wait_idle() {
                tracing::error!("Error while waiting for device idle during suspend: {}", e);
                self.fail_to_exiting(
                    "Running",
                    event_loop,
                    eyre::eyre!("waiting for device idle during suspend: {e}"),
                );
                return;
            }

            tracing::debug!("State transition: Running -> Suspended");
            self.set_suspended(SuspendedState {
                instance,
                win,
                device,
            });
        }
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        window_id: winit::window::WindowId,
        window_event: winit::event::WindowEvent,
    ) {
        assert!(self.state.is_some());
        if !self.is_running_window(window_id) {
            return;
        }

        if matches!(&window_event, WindowEvent::CloseRequested) {
            tracing::trace!("Close window request received for window");
            self.exit_from_running(event_loop);
        }

        // Nothing renders yet; resize and redraw events have no work to
        // do until a swapchain and frame loop exist.
    }
}

impl AppRunner {
    fn transition_to_exiting(
        &mut self,
        from_state: &'static str,
        event_loop: &winit::event_loop::ActiveEventLoop,
    ) {
        tracing::debug!("State transition: {} -> Exiting", from_state);
        self.set_exiting(ExitingState {});
        event_loop.exit();
    }

    /// Record a fatal setup failure and head for exit. The report is
    /// surfaced as the process exit status after the event loop ends.
    fn fail_to_exiting(
        &mut self,
        from_state: &'static str,
        event_loop: &winit::event_loop::ActiveEventLoop,
        report: eyre::Report,
    ) {
        if self.failure.is_none() {
            self.failure = Some(report);
        }
        self.transition_to_exiting(from_state, event_loop);
    }

    fn exit_from_running(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if self.take_running().is_some() {
            self.transition_to_exiting("Running", event_loop);
        } else {
            tracing::warn!("Requested Running -> Exiting transition while not in Running state");
            event_loop.exit();
        }
    }

    fn is_running_window(&self, window_id: winit::window::WindowId) -> bool {
        if let Some(running_state) = self.as_running()
            && window_id == running_state.win.id()
        {
            true
        } else {
            false
        }
    }

    fn take_initializing(&mut self) -> Option<InitializingState> {
        assert!(self.state.is_some());
        if matches!(self.state, Some(App::Initializing(_))) {
            match self.state.take() {
                Some(App::Initializing(s)) => Some(s),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    fn take_running(&mut self) -> Option<RunningState> {
        assert!(self.state.is_some());
        if matches!(self.state, Some(App::Running(_))) {
            match self.state.take() {
                Some(App::Running(s)) => Some(s),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    fn as_running(&self) -> Option<&RunningState> {
        assert!(self.state.is_some());
        match &self.state {
            Some(App::Running(s)) => Some(s),
            _ => None,
        }
    }

    fn set_running(&mut self, state: RunningState) {
        assert!(self.state.is_none());
        self.state = Some(App::Running(state));
    }

    fn take_suspended(&mut self) -> Option<SuspendedState> {
        assert!(self.state.is_some());
        if matches!(self.state, Some(App::Suspended(_))) {
            match self.state.take() {
                Some(App::Suspended(s)) => Some(s),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    fn set_suspended(&mut self, state: SuspendedState) {
        assert!(self.state.is_none());
        self.state = Some(App::Suspended(state));
    }

    fn is_exiting(&self) -> bool {
        assert!(self.state.is_some());
        matches!(self.state, Some(App::Exiting(_)))
    }

    fn set_exiting(&mut self, state: ExitingState) {
        assert!(self.state.is_none());
        self.state = Some(App::Exiting(state));
    }
}
