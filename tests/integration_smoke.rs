#![cfg(feature = "integration")]

use quote_portrait::{
    Env, GenerationRequest, JimengTasks, PortraitOrchestrator, ProviderSettings, QuoteClient,
    Result, ServerConfig, portrait_prompt,
};

fn settings() -> ProviderSettings {
    ProviderSettings::from_env(&Env::default())
}

#[tokio::test]
async fn jimeng_async_task_smoke() -> Result<()> {
    let settings = settings();
    let Some(jimeng) = settings.jimeng.as_ref() else {
        return Ok(());
    };

    let images = JimengTasks::from_settings(jimeng)?
        .run(&portrait_prompt("Ada Lovelace"))
        .await?;
    assert!(images.image_base64.is_some() || images.image_url.is_some());
    Ok(())
}

#[tokio::test]
async fn orchestrator_smoke() -> Result<()> {
    let settings = settings();
    if settings.primary.is_none() {
        return Ok(());
    }

    let orchestrator = PortraitOrchestrator::from_settings(&settings, &ServerConfig::default())?;
    let outcome = orchestrator
        .generate(&GenerationRequest::new(portrait_prompt("Ada Lovelace"))?)
        .await?;
    assert!(!outcome.image.display_ref().is_empty());
    Ok(())
}

#[tokio::test]
async fn deepseek_quote_smoke() -> Result<()> {
    let settings = settings();
    let Some(deepseek) = settings.deepseek.as_ref() else {
        return Ok(());
    };

    let quote = QuoteClient::from_settings(deepseek)?
        .generate_quote("Albert Einstein")
        .await?;
    assert!(!quote.trim().is_empty());
    Ok(())
}
