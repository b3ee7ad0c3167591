//! catheter-comm - stand-in processing server and console demo.
//!
//! - `serve`: accepts console connections and answers every catalogue request
//!   with a success response.
//! - `demo`: connects as the console and plays one registration session.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use catheter_comm::messages::{
    CgsClock, InitContinuousRegistrationRequest, InitContinuousRegistrationResponse,
    LoadPlanningDataRequest, LoadPlanningDataResponse, Outcome, StartRegistrationRequest,
    StartRegistrationResponse, StopRegistrationRequest, StopRegistrationResponse,
    TranslationVector, UpdateAntennaSampleRequest, UpdateAntennaSampleResponse, Vector3,
};
use catheter_comm::{CommService, Config};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON config file; defaults plus environment overrides when omitted
    #[arg(long, global = true, env = "CATHETER_COMM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a processing server that accepts every request
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Connect as the console and send one session's requests
    Demo {
        /// Processing server address
        #[arg(long, default_value = "127.0.0.1:8000")]
        connect: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    catheter_comm::observability::init_tracing(&config.observability);

    match args.command {
        Command::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.server.listen_addr.clone());
            serve(config, &addr).await?;
        }
        Command::Demo { connect } => demo(config, &connect).await?,
    }
    Ok(())
}

async fn serve(config: Config, addr: &str) -> catheter_comm::Result<()> {
    let service = CommService::new(config.comm);
    service.on(|request: InitContinuousRegistrationRequest| async move {
        tracing::info!(
            "Init: shm={} {}x{}x{}",
            request.shared_memory_name,
            request.frame_width,
            request.frame_height,
            request.color_bytes
        );
        Ok(InitContinuousRegistrationResponse::ok())
    });
    service.on(|request: LoadPlanningDataRequest| async move {
        tracing::info!("Load planning data from {}", request.skeleton_dir_path);
        Ok(LoadPlanningDataResponse::ok())
    });
    service.on(|_: StartRegistrationRequest| async { Ok(StartRegistrationResponse::ok()) });
    service.on(|_: StopRegistrationRequest| async { Ok(StopRegistrationResponse::ok()) });
    service.on(|request: UpdateAntennaSampleRequest| async move {
        Ok(UpdateAntennaSampleResponse {
            pc_time: request.pc_time,
            cgs_time: request.cgs_time,
            ..Default::default()
        })
    });

    let server = Arc::new(service.bind(addr).await?);
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for ctrl-c: {}", e);
    }
    server.shutdown();
    match serving.await {
        Ok(result) => result,
        Err(e) => Err(catheter_comm::Error::handler(format!("server task failed: {}", e))),
    }
}

async fn demo(config: Config, addr: &str) -> catheter_comm::Result<()> {
    let service = CommService::new(config.comm);
    let connection = service.connect(addr).await?;

    let init = connection
        .request(InitContinuousRegistrationRequest {
            shared_memory_name: "video_frame_shm".to_string(),
            frame_width: 720,
            frame_height: 720,
            color_bytes: 3,
            ..Default::default()
        })
        .await?;
    tracing::info!("Init success={} {}", init.success, init.error_message);

    let load = connection
        .request(LoadPlanningDataRequest {
            skeleton_dir_path: "/data/skeleton".to_string(),
            data_dir_file_path: "/data/plan".to_string(),
            target_position: Vector3::new(10.0, 20.0, 30.0),
        })
        .await?;
    tracing::info!("LoadPlanningData success={} {}", load.is_success(), load.error_message);

    let start = connection
        .request(StartRegistrationRequest {
            pst1_position: TranslationVector::new(1.0, 0.0, 0.0),
            pst2_position: TranslationVector::new(0.0, 1.0, 0.0),
            pst3_position: TranslationVector::new(0.0, 0.0, 1.0),
        })
        .await?;
    tracing::info!("StartRegistration success={}", start.is_success());

    let sample = connection
        .request(UpdateAntennaSampleRequest {
            pc_time: chrono::Utc::now().timestamp(),
            cgs_time: CgsClock::now(),
            ..Default::default()
        })
        .await?;
    tracing::info!(
        "UpdateAntennaSample node={} lumens={} in {}s",
        sample.node_id,
        sample.lumens.len(),
        sample.process_time
    );

    let stop = connection.request(StopRegistrationRequest {}).await?;
    tracing::info!("StopRegistration success={}", stop.is_success());

    connection.close().await;
    Ok(())
}
