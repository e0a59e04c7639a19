use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use noticewire_common::Config;
use noticewire_pipeline::attachments::{AttachmentProcessor, AttachmentSettings};
use noticewire_pipeline::deliver::{
    ChannelLimits, Delivery, DeliverySettings, NotificationChannel,
};
use noticewire_pipeline::fetch::{DirectFetcher, FetchSettings, RenderedFetcher, TieredFetcher};
use noticewire_pipeline::run::Pipeline;
use noticewire_pipeline::sources::{
    CampusFeedSource, ExamCellSource, NoticeSource, RegistrarSource,
};
use noticewire_pipeline::store::PgAnnouncedStore;
use noticewire_pipeline::webhook::WebhookChannel;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("noticewire=info".parse()?))
        .init();

    info!("Noticewire pipeline starting...");

    // Load config
    let config = Config::from_env();
    config.log_redacted();

    // Connect the announced-notice store and run migrations
    let store = PgAnnouncedStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;

    // Fetch layer: direct HTTP with an optional rendered-page fallback
    let fetch_settings = FetchSettings {
        attempts: config.fetch_attempts,
        timeout: Duration::from_secs(config.fetch_timeout_secs),
        proxy_url: config.proxy_url.clone(),
        ..FetchSettings::default()
    };
    let min_content_len = fetch_settings.min_content_len;
    let rendered = config.render_base_url.as_deref().map(|base| {
        Box::new(RenderedFetcher::new(
            base,
            config.render_token.as_deref(),
            min_content_len,
        )) as Box<dyn noticewire_pipeline::fetch::FetchStrategy>
    });
    let fetch = TieredFetcher::new(Box::new(DirectFetcher::new(fetch_settings)?), rendered);

    // Sources are deployment configuration: only the boards with a configured
    // URL run.
    let mut sources: Vec<Box<dyn NoticeSource>> = Vec::new();
    if let Some(ref url) = config.exam_cell_url {
        sources.push(Box::new(ExamCellSource::new(url.clone())));
    }
    if let Some(ref url) = config.registrar_url {
        sources.push(Box::new(RegistrarSource::new(url.clone())));
    }
    if let Some(ref url) = config.campus_feed_url {
        sources.push(Box::new(CampusFeedSource::new(url.clone())));
    }
    if sources.is_empty() {
        anyhow::bail!("No sources configured: set EXAM_CELL_URL, REGISTRAR_URL, or CAMPUS_FEED_URL");
    }

    // Attachment processing
    let processor = AttachmentProcessor::new(AttachmentSettings {
        per_file_cap: config.per_file_cap_bytes,
        per_notice_cap: config.per_notice_cap_bytes,
        max_pdf_pages: config.max_pdf_pages,
        ..AttachmentSettings::default()
    })?;

    // Delivery
    let limits = ChannelLimits {
        max_files_per_send: config.attachment_chunk_size,
        max_bytes_per_send: config.max_bytes_per_send,
    };
    let channel: Arc<dyn NotificationChannel> =
        Arc::new(WebhookChannel::new(&config.webhook_url, limits));
    let admin = config
        .admin_webhook_url
        .as_deref()
        .map(|url| Arc::new(WebhookChannel::new(url, limits)) as Arc<dyn NotificationChannel>);
    let delivery = Delivery::new(
        channel,
        admin,
        DeliverySettings {
            chunk_size: config.attachment_chunk_size,
            ..DeliverySettings::default()
        },
    );

    // One run per invocation; the external scheduler handles periodicity.
    let pipeline = Pipeline::new(
        sources,
        Box::new(fetch),
        Arc::new(store),
        processor,
        delivery,
        config.max_notice_age_days,
    );

    let stats = pipeline.run().await?;
    info!("Pipeline run complete. {stats}");

    Ok(())
}
