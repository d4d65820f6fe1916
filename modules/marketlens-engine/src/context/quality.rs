//! Self-computed content quality for items whose upstream did not supply
//! a `quality_score`. Length, information density, title shape, and the
//! presence of a summary, weighted 40/30/15/15.

use regex::Regex;

use marketlens_common::ContextItem;

pub struct QualityScorer {
    digits: Regex,
    percentage: Regex,
    money: Regex,
    entity: Regex,
}

impl QualityScorer {
    pub fn new() -> Self {
        Self {
            digits: Regex::new(r"\d").expect("digit pattern"),
            percentage: Regex::new(r"\d+(?:\.\d+)?%").expect("percentage pattern"),
            money: Regex::new(r"\d+(?:조|억|만)\s?원|\$\d+|₩\d+").expect("money pattern"),
            entity: Regex::new(r"삼성|SK|LG|현대|포스코|네이버|카카오|한화|셀트리온")
                .expect("entity pattern"),
        }
    }

    pub fn content_quality(&self, item: &ContextItem) -> f32 {
        let text = item.text();

        let length_score = match text.chars().count() {
            n if n > 1000 => 1.0,
            n if n > 500 => 0.8,
            n if n > 200 => 0.5,
            _ => 0.3,
        };

        let mut density_score = 0.0;
        if self.digits.is_match(&text) {
            density_score += 0.25;
        }
        if self.percentage.is_match(&text) {
            density_score += 0.25;
        }
        if self.money.is_match(&text) {
            density_score += 0.25;
        }
        if self.entity.is_match(&text) {
            density_score += 0.25;
        }

        let title_len = item.title().chars().count();
        let title_quality = if title_len > 10 && title_len < 100 {
            1.0
        } else {
            0.5
        };

        let summary_presence = if item.summary().chars().count() > 50 {
            1.0
        } else {
            0.5
        };

        let score: f32 = length_score * 0.40
            + density_score * 0.30
            + title_quality * 0.15
            + summary_presence * 0.15;
        score.clamp(0.0, 1.0)
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketlens_common::{ContextSource, ContextType};
    use serde_json::{Map, Value};

    fn item_with(title: &str, summary: &str) -> ContextItem {
        let mut content = Map::new();
        content.insert("title".into(), Value::String(title.into()));
        content.insert("summary".into(), Value::String(summary.into()));
        ContextItem::new(ContextSource::Search, ContextType::News, content)
    }

    #[test]
    fn dense_financial_text_scores_higher_than_thin_text() {
        let scorer = QualityScorer::new();
        let rich = item_with(
            "삼성전자 3분기 영업이익 10조원 돌파",
            &format!(
                "삼성전자가 3분기 영업이익 10조원을 기록하며 전년 대비 25% 증가했다. {}",
                "메모리 가격 회복이 주효했다. ".repeat(20)
            ),
        );
        let thin = item_with("제목", "짧음");
        assert!(scorer.content_quality(&rich) > scorer.content_quality(&thin));
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let scorer = QualityScorer::new();
        let item = item_with(
            "삼성전자 영업이익 10조원 25% 증가 발표",
            &"매우 긴 본문 ".repeat(200),
        );
        let score = scorer.content_quality(&item);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn empty_item_gets_minimum_baseline() {
        let scorer = QualityScorer::new();
        let item = item_with("", "");
        let score = scorer.content_quality(&item);
        // 0.3*0.4 + 0.5*0.15 + 0.5*0.15 = 0.27
        assert!((score - 0.27).abs() < 1e-5);
    }
}
