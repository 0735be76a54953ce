mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use weldscan::config::DetectionConfig;
use weldscan::core::db::{InspectionImage, InspectionReport, NewOwner, Owner};
use weldscan::report::{DefectCatalog, SegmentSummary, parse_defect_rects, summarize_detections};
use weldscan::{
    AppConfig, DetectionService, DetectionStatus, Detector, InspectionService, UnavailableDetector,
};

use crate::cli::{Cli, Commands, OwnerCommand};

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Catalog => {
            let catalog = DefectCatalog::load(&config.catalog.path)?;
            for (code, name) in catalog.iter() {
                println!("{}\t{}", code, name);
            }
            return Ok(());
        }
        Commands::Summarize(args) => {
            let catalog = DefectCatalog::load(&config.catalog.path)?;
            let layout = config.binning.layout()?;
            let defects = tokio::fs::read_to_string(&args.defects)
                .await
                .with_context(|| format!("Failed to read {:?}", args.defects))?;
            let detections = parse_defect_rects(&defects)?;
            print_segments(&summarize_detections(&detections, &layout, &catalog));
            return Ok(());
        }
        _ => {}
    }

    let detection = DetectionService::from_boxed(
        build_detector(&config.detection),
        config.detection.timeout(),
    );
    let service = InspectionService::from_config(&config, detection).await?;
    let result = execute(&service, cli.command).await;
    service.db().close().await;
    result
}

async fn execute(service: &InspectionService, command: Commands) -> Result<()> {
    match command {
        Commands::Owner(OwnerCommand::Create(args)) => {
            let owner = service
                .create_owner(NewOwner {
                    full_name: args.full_name,
                    status: args.status,
                    email: args.email,
                })
                .await?;
            print_owner(&owner);
        }
        Commands::Owner(OwnerCommand::List) => {
            for owner in service.list_owners().await? {
                print_owner(&owner);
            }
        }
        Commands::Owner(OwnerCommand::Show(args)) => {
            let owner = service.get_owner(args.owner_id).await?;
            print_owner(&owner);
            for image in service.list_images(owner.id).await? {
                print_image(&image);
            }
            for report in service.list_reports(owner.id).await? {
                print_report(&report);
            }
        }
        Commands::Owner(OwnerCommand::Delete(args)) => {
            service.delete_owner(args.owner_id).await?;
            println!("deleted owner {}", args.owner_id);
        }
        Commands::Upload(args) => {
            let bytes = tokio::fs::read(&args.image_path)
                .await
                .with_context(|| format!("Failed to read image {:?}", args.image_path))?;
            let outcome = service
                .upload_image(args.owner_id, &args.content_type, bytes)
                .await?;
            print_image(&outcome.image);
            print_detection_status(&outcome.detection);
        }
        Commands::Annotate(args) => {
            let bytes = tokio::fs::read(&args.image_path)
                .await
                .with_context(|| format!("Failed to read image {:?}", args.image_path))?;
            let defects = tokio::fs::read_to_string(&args.defects)
                .await
                .with_context(|| format!("Failed to read {:?}", args.defects))?;
            let outcome = service
                .annotate_image(
                    args.owner_id,
                    &args.filename,
                    &args.content_type,
                    bytes,
                    &defects,
                )
                .await?;
            print_image(&outcome.image);
            print_report(&outcome.report);
            print_segments(&outcome.report.segments);
        }
        Commands::Redetect(args) => {
            let outcome = service.redetect(args.owner_id, &args.filename).await?;
            print_image(&outcome.image);
            print_detection_status(&outcome.detection);
        }
        Commands::Detections(args) => {
            match service.get_detections(args.owner_id, &args.filename).await? {
                Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                None => println!("no detections available"),
            }
        }
        Commands::Images(args) => {
            for image in service.list_images(args.owner_id).await? {
                print_image(&image);
            }
        }
        Commands::Reports(args) => {
            for report in service.list_reports(args.owner_id).await? {
                print_report(&report);
            }
        }
        Commands::ExportImage(args) => {
            let bytes = service.read_image(args.owner_id, &args.filename).await?;
            tokio::fs::write(&args.out, bytes)
                .await
                .with_context(|| format!("Failed to write {:?}", args.out))?;
        }
        Commands::ExportReport(args) => {
            let bytes = service.read_report(args.owner_id, &args.filename).await?;
            tokio::fs::write(&args.out, bytes)
                .await
                .with_context(|| format!("Failed to write {:?}", args.out))?;
        }
        Commands::Catalog | Commands::Summarize(_) => {}
    }
    Ok(())
}

#[cfg(feature = "rten-engine")]
fn build_detector(config: &DetectionConfig) -> Box<dyn Detector> {
    use weldscan::detection::engine::{EngineParams, RtenDetector};
    use weldscan::detection::preprocessing::BrightnessNormalization;

    let Some(model_path) = &config.model_path else {
        warn!("no detection model configured, detection passes will fail");
        return Box::new(UnavailableDetector::new("no detection model configured"));
    };

    let loaded = RtenDetector::load(model_path, EngineParams::from(config)).and_then(|detector| {
        Ok(detector.with_brightness(BrightnessNormalization::from_config(config)?))
    });
    match loaded {
        Ok(detector) => Box::new(detector),
        Err(err) => {
            error!(error = %format!("{:#}", err), "failed to load detection model");
            Box::new(UnavailableDetector::new(format!("{:#}", err)))
        }
    }
}

#[cfg(not(feature = "rten-engine"))]
fn build_detector(config: &DetectionConfig) -> Box<dyn Detector> {
    if config.model_path.is_some() {
        warn!("built without the rten-engine feature, ignoring detection.model_path");
    }
    Box::new(UnavailableDetector::new("built without a detection engine"))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_owner(owner: &Owner) {
    println!(
        "{}\t{}\t{}\t{}\timages={}\treports={}",
        owner.id,
        owner.full_name,
        owner.status,
        owner.email,
        owner.images.len(),
        owner.reports.len()
    );
}

fn print_image(image: &InspectionImage) {
    println!(
        "image\t{}\tv{}\t{:?}\t{}x{}",
        image.filename, image.version, image.state, image.width, image.height
    );
}

fn print_report(report: &InspectionReport) {
    println!(
        "report\t{}\timage={}\tv{}",
        report.filename, report.image_id, report.image_version
    );
}

fn print_segments(segments: &[SegmentSummary]) {
    for segment in segments {
        println!("{}\t{}", segment.label, segment.defect_text);
    }
}

fn print_detection_status(status: &DetectionStatus) {
    match status {
        DetectionStatus::Completed { detections } => println!("detections: {}", detections),
        DetectionStatus::Failed(err) => println!("detection failed: {}", err),
        DetectionStatus::Discarded { current_version } => {
            println!("detection result discarded, image is now at v{}", current_version)
        }
    }
}
