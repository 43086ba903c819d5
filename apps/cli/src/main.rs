use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;

use marketai_core_sdk::{
    adapter::ContentAdapter,
    campaign::effective_tone,
    config::AppConfig,
    db,
    models::{
        CampaignPeriod, GenerationRequest, NewCampaign, NewPost, Platform, PostPatch,
        ProviderConfig,
    },
    server,
    settings::SettingsSource,
    telemetry,
};

/**
 * \brief 营销内容助手命令行入口。
 */
#[derive(Parser, Debug)]
#[command(name = "marketai", version, about = "Marketing content generation with pluggable AI providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /** \brief 管理 AI Provider 配置。 */
    #[command(subcommand)]
    Provider(ProviderCommand),

    /**
     * \brief 为一个或多个平台生成内容；多个平台按顺序逐个生成。
     */
    Generate {
        #[arg(long)]
        topic: String,
        #[arg(long = "platform", required = true, value_delimiter = ',')]
        platforms: Vec<Platform>,
        #[arg(long)]
        tone: Option<String>,
        /// Save generated drafts to history
        #[arg(long, default_value_t = false)]
        save: bool,
    },

    /** \brief 分析一段文本的语气。 */
    Analyze(AnalyzeArgs),

    #[command(subcommand)]
    History(HistoryCommand),

    #[command(subcommand)]
    Campaign(CampaignCommand),

    /** \brief 打开或关闭本地日志文件记录。 */
    Telemetry {
        #[arg(value_enum)]
        state: Switch,
    },

    /**
     * \brief 启动本地 HTTP 服务并提供前端页面。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[derive(Subcommand, Debug)]
enum ProviderCommand {
    /**
     * \brief 新增 Provider。
     * \param provider Provider 类型，如 openai / gemini / anthropic
     * \param model    模型名
     */
    Add {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long, default_value_t = false)]
        activate: bool,
    },
    List,
    Activate { id: i64 },
    Deactivate { id: i64 },
    Remove { id: i64 },
    /// Test a stored provider, the active one when no id is given
    Test { id: Option<i64> },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct AnalyzeArgs {
    #[arg(long)]
    content: Option<String>,
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    List {
        #[arg(long)]
        platform: Option<Platform>,
    },
    Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
enum CampaignCommand {
    /** \brief 新建活动；`--copy-from` 沿用历史活动的品牌设定。 */
    Create {
        #[arg(long)]
        client: String,
        #[arg(long, default_value = "month")]
        period: CampaignPeriod,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        brand_voice: Option<String>,
        #[arg(long)]
        audience: Option<String>,
        #[arg(long)]
        goals: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        copy_from: Option<i64>,
    },
    List,
    Show { id: i64 },
    AddPost {
        campaign_id: i64,
        #[arg(long)]
        platform: Platform,
        /// YYYY-MM-DD or RFC 3339
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        tone: Option<String>,
        #[arg(long)]
        caption: Option<String>,
    },
    /** \brief 按活动简报为帖子生成文案并保存。 */
    Caption { post_id: i64 },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("load configuration failed")?;
    if let Err(err) = telemetry::init(&config.log_dir) {
        eprintln!("logging setup failed: {:#}", err);
    }

    {
        let conn = db::open(&config.db_path).context("open database failed")?;
        db::migrate(&conn).context("apply migrations failed")?;
        telemetry::set_enabled(db::get_telemetry_enabled(&conn).unwrap_or(false));
    }

    match cli.command {
        Commands::Provider(cmd) => run_provider(&config, cmd).await,
        Commands::Generate {
            topic,
            platforms,
            tone,
            save,
        } => run_generate(&config, topic, platforms, tone, save).await,
        Commands::Analyze(args) => {
            let content = match (args.content, args.file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read {} failed", path.display()))?,
                (None, None) => return Err(anyhow!("provide --content or --file")),
            };
            let analysis = build_adapter(&config)?.analyze_tone(&content).await;
            println!("Tone: {}", analysis.tone);
            println!("Keywords: {}", analysis.keywords.join(", "));
            Ok(())
        }
        Commands::History(cmd) => run_history(&config, cmd),
        Commands::Campaign(cmd) => run_campaign(&config, cmd).await,
        Commands::Telemetry { state } => {
            let enabled = state == Switch::On;
            let conn = db::open(&config.db_path)?;
            db::set_telemetry_enabled(&conn, enabled).context("save telemetry failed")?;
            telemetry::set_enabled(enabled);
            println!("Telemetry {}", if enabled { "enabled" } else { "disabled" });
            Ok(())
        }
        Commands::Serve { addr } => server::run(&addr, config).await,
    }
}

fn build_adapter(config: &AppConfig) -> Result<ContentAdapter<SettingsSource>> {
    Ok(
        ContentAdapter::with_timeout(SettingsSource::from_config(config), config.request_timeout)?
            .identity(config.identity.clone())
            .simulated_latency(config.simulated_latency),
    )
}

async fn run_provider(config: &AppConfig, cmd: ProviderCommand) -> Result<()> {
    let conn = db::open(&config.db_path)?;
    match cmd {
        ProviderCommand::Add {
            provider,
            model,
            api_key,
            base_url,
            activate,
        } => {
            let mut cfg = ProviderConfig::new(provider, model);
            cfg.api_key = api_key;
            cfg.base_url = base_url;
            cfg.is_active = activate;
            let id = db::insert_provider(&conn, &cfg).context("save provider failed")?;
            println!(
                "Saved provider id={} ({} | {}){}",
                id,
                cfg.provider_name,
                cfg.model_name,
                if activate { " [active]" } else { "" }
            );
        }
        ProviderCommand::List => {
            let providers = db::list_providers(&conn)?;
            if providers.is_empty() {
                println!("No providers configured; generation runs in simulation mode.");
            }
            for p in providers {
                println!(
                    "{}{:>4}  {:<12} {:<28} key={} base={}",
                    if p.is_active { "*" } else { " " },
                    p.id.unwrap_or_default(),
                    p.provider_name,
                    p.model_name,
                    if p.credential().is_some() { "set" } else { "missing" },
                    p.base_url.as_deref().unwrap_or("default")
                );
            }
        }
        ProviderCommand::Activate { id } => {
            db::set_provider_active(&conn, id, true)?;
            println!("Provider {} is now active", id);
        }
        ProviderCommand::Deactivate { id } => {
            db::set_provider_active(&conn, id, false)?;
            println!("Provider {} deactivated", id);
        }
        ProviderCommand::Remove { id } => {
            db::delete_provider(&conn, id)?;
            println!("Removed provider {}", id);
        }
        ProviderCommand::Test { id } => {
            let provider = match id {
                Some(id) => Some(
                    db::get_provider_by_id(&conn, id)?
                        .with_context(|| format!("provider id {} not found", id))?,
                ),
                None => None,
            };
            drop(conn);
            let adapter = build_adapter(config)?;
            let outcome = match &provider {
                Some(provider) => adapter.test_connection(provider).await,
                None => adapter.test_active_connection().await,
            };
            match outcome {
                Ok(true) => println!("Connection OK"),
                Ok(false) => println!("Connected, but the model did not confirm success"),
                Err(err) => println!("Connection failed: {}", err),
            }
        }
    }
    Ok(())
}

async fn run_generate(
    config: &AppConfig,
    topic: String,
    platforms: Vec<Platform>,
    tone: Option<String>,
    save: bool,
) -> Result<()> {
    tracing::info!(
        target: "cli.generate",
        platforms = platforms.len(),
        save,
        "generate topic_len={}",
        topic.len()
    );
    let adapter = build_adapter(config)?;
    if let [platform] = platforms.as_slice() {
        let request = GenerationRequest::new(*platform, topic, tone.as_deref())?;
        let text = adapter.generate_content(&request).await;
        println!("{}", text);
        if save {
            let conn = db::open(&config.db_path)?;
            let saved = db::insert_content(&conn, *platform, &text)?;
            println!("Saved content id={}", saved.id);
        }
        return Ok(());
    }

    let mut drafts = adapter.generate_batch(platforms, topic, tone);
    while let Some(draft) = drafts.next().await.transpose()? {
        println!("=== {} ===", draft.platform);
        println!("{}\n", draft.text);
        if save {
            let conn = db::open(&config.db_path)?;
            let saved = db::insert_content(&conn, draft.platform, &draft.text)?;
            println!("Saved content id={}", saved.id);
        }
    }
    Ok(())
}

fn run_history(config: &AppConfig, cmd: HistoryCommand) -> Result<()> {
    let conn = db::open(&config.db_path)?;
    match cmd {
        HistoryCommand::List { platform } => {
            for item in db::list_contents(&conn, platform)? {
                let preview: String = item.text.chars().take(60).collect();
                println!(
                    "{:>4}  {:<10} {}  {}",
                    item.id,
                    item.platform,
                    item.created_at,
                    preview.replace('\n', " ")
                );
            }
        }
        HistoryCommand::Delete { id } => {
            db::delete_content(&conn, id)?;
            println!("Deleted content {}", id);
        }
    }
    Ok(())
}

async fn run_campaign(config: &AppConfig, cmd: CampaignCommand) -> Result<()> {
    match cmd {
        CampaignCommand::Create {
            client,
            period,
            start,
            brand_voice,
            audience,
            goals,
            notes,
            copy_from,
        } => {
            let conn = db::open(&config.db_path)?;
            let campaign = db::create_campaign(
                &conn,
                NewCampaign {
                    client_name: client,
                    period,
                    start_date: start,
                    brand_voice,
                    target_audience: audience,
                    goals,
                    notes,
                    copy_from,
                },
            )?;
            println!(
                "Created campaign id={} ({}, {} from {})",
                campaign.id,
                campaign.client_name,
                campaign.period.as_str(),
                campaign.start_date
            );
        }
        CampaignCommand::List => {
            let conn = db::open(&config.db_path)?;
            for c in db::list_campaigns(&conn)? {
                println!(
                    "{:>4}  {:<24} {:<6} {}",
                    c.id,
                    c.client_name,
                    c.period.as_str(),
                    c.start_date
                );
            }
        }
        CampaignCommand::Show { id } => {
            let conn = db::open(&config.db_path)?;
            let c = db::get_campaign(&conn, id)?
                .with_context(|| format!("campaign id {} not found", id))?;
            println!("{} ({}, from {})", c.client_name, c.period.as_str(), c.start_date);
            println!("Brand voice: {}", c.brand_voice.as_deref().unwrap_or("-"));
            println!("Audience: {}", c.target_audience.as_deref().unwrap_or("-"));
            println!("Goals: {}", c.goals.as_deref().unwrap_or("-"));
            for p in db::list_posts(&conn, id)? {
                println!(
                    "  #{:<4} {}  {:<10} [{}] {}",
                    p.id,
                    p.post_date,
                    p.platform,
                    p.tone.as_deref().unwrap_or("-"),
                    p.caption.replace('\n', " ")
                );
            }
        }
        CampaignCommand::AddPost {
            campaign_id,
            platform,
            date,
            tone,
            caption,
        } => {
            let conn = db::open(&config.db_path)?;
            let post = db::insert_post(
                &conn,
                campaign_id,
                &NewPost {
                    platform,
                    post_date: date,
                    caption,
                    tone,
                    hashtags: None,
                },
            )?;
            println!("Added post id={} on {}", post.id, post.post_date);
        }
        CampaignCommand::Caption { post_id } => {
            let (campaign, post) = {
                let conn = db::open(&config.db_path)?;
                let post = db::get_post(&conn, post_id)?
                    .with_context(|| format!("post id {} not found", post_id))?;
                let campaign = db::get_campaign(&conn, post.campaign_id)?
                    .with_context(|| format!("campaign id {} not found", post.campaign_id))?;
                (campaign, post)
            };
            let caption = build_adapter(config)?
                .generate_caption(&campaign, &post)
                .await;
            let conn = db::open(&config.db_path)?;
            db::update_post(
                &conn,
                post_id,
                &PostPatch {
                    caption: Some(caption.clone()),
                    tone: effective_tone(&campaign, &post),
                    ..Default::default()
                },
            )?;
            println!("{}", caption);
        }
    }
    Ok(())
}
