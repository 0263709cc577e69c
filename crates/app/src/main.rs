mod costcenter_api;
mod notifier;
mod pages;
mod problem;
mod router;
mod submission;
mod telemetry;

use std::{net::SocketAddr, sync::Arc};

use tracing::info;

use contoso_expenses_clients::{CostCenterClient, SendGridClient};
use contoso_expenses_storage::{
    ConsumerSettings, Database, MessageEncoding, QueueConsumer, QueuePublisher, QueueSettings,
};
use contoso_expenses_util::{load_env_file, AppConfig, QueueEncoding};

use crate::notifier::{EmailNotifier, NotifierWorker};
use crate::submission::ExpenseSubmissionWorkflow;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let lookup_http = reqwest::Client::builder()
        .timeout(config.cost_center_api.timeout)
        .build()?;

    let queue_settings = QueueSettings {
        name: config.queue.name.clone(),
        encoding: match config.queue.encoding {
            QueueEncoding::Base64 => MessageEncoding::Base64,
            QueueEncoding::Plain => MessageEncoding::Plain,
        },
    };

    let workflow = ExpenseSubmissionWorkflow::new(
        Arc::new(CostCenterClient::new(
            config.cost_center_api.base_url.clone(),
            lookup_http,
        )),
        Arc::new(database.expenses()),
        Arc::new(QueuePublisher::new(database.queue(), queue_settings.clone())),
    );

    if let Some(notifier) = &config.notifier {
        let mail_http = reqwest::Client::builder()
            .timeout(notifier.mail.timeout)
            .build()?;
        let mailer = SendGridClient::new(
            notifier.mail.api_key.clone(),
            notifier.mail.base_url.clone(),
            mail_http,
        );
        let consumer = QueueConsumer::new(
            database.queue(),
            ConsumerSettings {
                queue: queue_settings,
                visibility_timeout: notifier.visibility_timeout,
                poll_interval: notifier.poll_interval,
                max_dequeue_count: notifier.max_dequeue_count,
            },
        );
        NotifierWorker::new(
            consumer,
            EmailNotifier::new(Arc::new(mailer)),
            notifier.concurrency,
        )
        .spawn();
    }

    let state = router::AppState::new(metrics, database, workflow);

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        role = %config.role.as_str(),
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state, config.role))
        .await
        .map_err(|err| err.into())
}
