use anyhow::{anyhow, Result};
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime};

use crate::models::{Campaign, CampaignPost, NewCampaign};

/**
 * \brief 当前 UTC 时间（RFC 3339）。
 */
pub fn now_rfc3339() -> Result<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

/**
 * \brief 规范化帖子日期。
 * \details 接受 RFC 3339 或 `YYYY-MM-DD`，后者按 UTC 零点处理。
 */
pub fn normalize_post_date(input: &str) -> Result<String> {
    let input = input.trim();
    if let Ok(ts) = OffsetDateTime::parse(input, &Rfc3339) {
        return Ok(ts.to_offset(time::UtcOffset::UTC).format(&Rfc3339)?);
    }
    let date = Date::parse(input, format_description!("[year]-[month]-[day]"))
        .map_err(|_| anyhow!("invalid post date: {}", input))?;
    Ok(date.midnight().assume_utc().format(&Rfc3339)?)
}

/**
 * \brief 帖子生效语气：帖子自身优先，其次活动品牌语气。
 */
pub fn effective_tone(campaign: &Campaign, post: &CampaignPost) -> Option<String> {
    non_blank(post.tone.as_deref())
        .or_else(|| non_blank(campaign.brand_voice.as_deref()))
        .map(str::to_string)
}

/**
 * \brief 组装活动文案简报，作为生成请求的主题。
 */
pub fn caption_brief(campaign: &Campaign, post: &CampaignPost) -> String {
    let tone = effective_tone(campaign, post).unwrap_or_else(|| "Professional".to_string());
    format!(
        "Write a {} caption for {}. Context/Goals: {}. Target Audience: {}. Required Tone: {}.",
        post.platform,
        campaign.client_name,
        non_blank(campaign.goals.as_deref()).unwrap_or("not specified"),
        non_blank(campaign.target_audience.as_deref()).unwrap_or("not specified"),
        tone
    )
}

/**
 * \brief 用历史活动补齐新活动中留空的品牌字段。
 */
pub fn inherit_from(new: &mut NewCampaign, source: &Campaign) {
    fill(&mut new.brand_voice, &source.brand_voice);
    fill(&mut new.target_audience, &source.target_audience);
    fill(&mut new.goals, &source.goals);
    fill(&mut new.notes, &source.notes);
}

fn fill(target: &mut Option<String>, source: &Option<String>) {
    if non_blank(target.as_deref()).is_none() {
        *target = source.clone();
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
