//! Rule-based intent classification and entity extraction.
//!
//! A pure function over its configuration: identical queries always produce
//! identical results. The Korean keyword bundles are the closed,
//! authoritative vocabulary; extending them is a configuration change.

use std::collections::BTreeSet;

use regex::Regex;

use marketlens_common::{Entities, Intent, Query};

struct IntentBundle {
    intent: Intent,
    keywords: &'static [&'static str],
    context_words: &'static [&'static str],
    patterns: Vec<Regex>,
    weight: f32,
}

/// Score below which the query is classified as Unknown.
const CONFIDENCE_FLOOR: f32 = 0.2;

const MAX_KEYWORDS: usize = 15;

pub struct IntentClassifier {
    bundles: Vec<IntentBundle>,
    company_patterns: Vec<Regex>,
    product_patterns: Vec<Regex>,
    sector_pattern: Regex,
    ticker_pattern: Regex,
    topic_pattern: Regex,
    token_pattern: Regex,
    stopwords: BTreeSet<&'static str>,
}

impl IntentClassifier {
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("intent pattern must compile"))
                .collect()
        };

        let bundles = vec![
            IntentBundle {
                intent: Intent::NewsInquiry,
                keywords: &[
                    "뉴스", "소식", "기사", "보도", "발표", "공시", "출시", "공개", "현황",
                    "이슈",
                ],
                context_words: &["관련", "최근", "오늘", "어제", "이번주", "나온", "대한"],
                patterns: compile(&[
                    r"뉴스.*보여줘",
                    r"소식.*알려줘",
                    r"관련.*뉴스",
                    r"최근.*소식",
                    r"기사.*찾아줘",
                    r"에.*대한.*뉴스",
                    r"사업.*현황",
                ]),
                weight: 1.2,
            },
            IntentBundle {
                intent: Intent::StockAnalysis,
                keywords: &[
                    "전망", "유망주", "추천", "투자", "주가", "수익률", "실적", "매출",
                    "영업이익", "밸류에이션",
                ],
                context_words: &["중에서", "가장", "좋은", "올해", "분기", "어때"],
                patterns: compile(&[
                    r"전망.*어때",
                    r"유망주",
                    r"투자.*추천",
                    r"관련.*종목",
                    r"어떤.*주식",
                    r"주가.*오를까",
                ]),
                weight: 1.0,
            },
            IntentBundle {
                intent: Intent::Comparison,
                keywords: &["비교", "대비", "경쟁력", "우위", "격차"],
                context_words: &["중에", "가운데", "보다", "상대"],
                patterns: compile(&[r"와.*비교", r"과.*비교", r"vs", r"대비.*어떻", r"경쟁력.*비교"]),
                weight: 1.1,
            },
            IntentBundle {
                intent: Intent::Trend,
                keywords: &["트렌드", "추이", "추세", "동향", "변화", "흐름"],
                context_words: &["시장", "산업", "최근", "장기"],
                patterns: compile(&[r"트렌드.*분석", r"추이.*분석", r"동향.*은", r"변화.*추세"]),
                weight: 1.0,
            },
            IntentBundle {
                intent: Intent::GeneralQa,
                keywords: &["뭐야", "무엇", "어떻게", "왜", "설명", "의미", "정의"],
                context_words: &["인가", "하는"],
                patterns: compile(&[r"뭐야", r"무엇.*인가", r"어떻게.*하는", r"설명.*해줘"]),
                weight: 0.8,
            },
        ];

        // Non-capturing groups throughout: a capturing alternation would
        // return tuples from find_iter-style collection and corrupt the
        // resulting string sets.
        let company_patterns = compile(&[
            r"(?:삼성전자|SK하이닉스|LG에너지솔루션|LG전자|LG화학|삼성SDI|현대차|기아|현대모비스|포스코|POSCO홀딩스|네이버|카카오|에코프로|한화시스템|한화에어로스페이스|LIG넥스원|한국항공우주|KAI|셀트리온|삼성바이오로직스|크래프톤|엔씨소프트|마이크론|TSMC|엔비디아)",
            r"(?:[가-힣]{1,6}(?:전자|시스템|케미칼|소프트|바이오|제약|머티리얼즈|에어로스페이스))",
        ]);

        let product_patterns = compile(&[
            r"(?:HBM[2-4]?E?|DDR[45]|GDDR[67]|CXL)",
            r"(?:갤럭시\s?[SZ]?\d{1,2}|아이폰\s?\d{1,2})",
            r"(?:4680\s?배터리|전고체\s?배터리)",
        ]);

        let sector_pattern = Regex::new(
            r"(?:반도체|파운드리|메모리|2차전지|배터리|전기차|자율주행|방산|국방|원전|SMR|AI|인공지능|바이오|헬스케어|제약|게임|메타버스|로봇|조선|철강|화학|금융|은행|증권|건설|유통|엔터|신재생에너지|수소)",
        )
        .expect("sector pattern must compile");

        let ticker_pattern = Regex::new(r"\b\d{6}\b").expect("ticker pattern must compile");

        // Investor-relevant topic nouns used for keyword extraction.
        let topic_pattern = Regex::new(
            r"(?:수주|실적|매출|영업이익|순이익|수익률|주가|투자|분석|전망|영향|현황|경쟁력|국산화|장비|소재|부품|정책|수출|계약|공급|출시|인수|합병|협력|파트너십)",
        )
        .expect("topic pattern must compile");

        let token_pattern =
            Regex::new(r"[가-힣A-Za-z0-9]+").expect("token pattern must compile");

        let stopwords: BTreeSet<&'static str> = [
            "은", "는", "이", "가", "을", "를", "의", "에", "에서", "로", "으로", "와", "과",
            "도", "만", "관련", "대한", "있는", "없는", "같은", "어떤", "주요", "최근", "오늘",
            "어제", "요즘", "지금", "해줘", "알려줘", "보여줘", "찾아줘", "말해줘", "뭐야",
            "무엇", "인가", "있나", "하는", "작성해줘",
        ]
        .into_iter()
        .collect();

        Self {
            bundles,
            company_patterns,
            product_patterns,
            sector_pattern,
            ticker_pattern,
            topic_pattern,
            token_pattern,
            stopwords,
        }
    }

    /// Classify a query: intent + confidence + entities + ordered keywords.
    pub fn classify(&self, text: &str) -> Query {
        let lowered = text.to_lowercase();

        let mut scores: Vec<(Intent, f32)> = Vec::with_capacity(self.bundles.len());
        for bundle in &self.bundles {
            scores.push((bundle.intent, self.score_bundle(&lowered, bundle)));
        }

        let total: f32 = scores.iter().map(|(_, s)| s).sum();
        let (mut intent, best) = scores
            .iter()
            .copied()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((Intent::Unknown, 0.0));

        let mut confidence = if total > 0.0 { best / total } else { 0.0 };
        if best < CONFIDENCE_FLOOR {
            intent = Intent::Unknown;
            confidence = 0.0;
        }

        let entities = self.extract_entities(text);
        let keywords = self.extract_keywords(text, &entities);

        Query {
            text: text.to_string(),
            keywords,
            entities,
            intent,
            confidence,
        }
    }

    fn score_bundle(&self, lowered: &str, bundle: &IntentBundle) -> f32 {
        let keyword_hits = bundle
            .keywords
            .iter()
            .filter(|k| lowered.contains(&k.to_lowercase()))
            .count() as f32;
        let context_hits = bundle
            .context_words
            .iter()
            .filter(|k| lowered.contains(&k.to_lowercase()))
            .count() as f32;
        let pattern_hits = bundle
            .patterns
            .iter()
            .filter(|p| p.is_match(lowered))
            .count() as f32;

        (keyword_hits * 0.3 + context_hits * 0.2 + pattern_hits * 0.5).min(1.0) * bundle.weight
    }

    pub fn extract_entities(&self, text: &str) -> Entities {
        let mut entities = Entities::default();

        for pattern in &self.company_patterns {
            for m in pattern.find_iter(text) {
                entities.companies.insert(m.as_str().to_string());
            }
        }
        for pattern in &self.product_patterns {
            for m in pattern.find_iter(text) {
                entities.products.insert(m.as_str().to_string());
            }
        }
        for m in self.sector_pattern.find_iter(text) {
            entities.sectors.insert(m.as_str().to_string());
        }
        for m in self.ticker_pattern.find_iter(text) {
            entities.tickers.insert(m.as_str().to_string());
        }

        entities
    }

    /// Entities first, topic nouns second, plain tokens as a fallback.
    /// Order-preserving dedup, capped at `MAX_KEYWORDS`.
    pub fn extract_keywords(&self, text: &str, entities: &Entities) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        let mut push = |kw: &str, keywords: &mut Vec<String>| {
            if kw.chars().count() >= 2
                && !kw.chars().all(|c| c.is_ascii_digit())
                && !self.stopwords.contains(kw)
                && !keywords.iter().any(|existing| existing == kw)
            {
                keywords.push(kw.to_string());
            }
        };

        for company in &entities.companies {
            push(company, &mut keywords);
        }
        for product in &entities.products {
            push(product, &mut keywords);
        }
        for sector in &entities.sectors {
            push(sector, &mut keywords);
        }

        for m in self.topic_pattern.find_iter(text) {
            push(m.as_str(), &mut keywords);
        }

        if keywords.is_empty() {
            for m in self.token_pattern.find_iter(text) {
                push(m.as_str(), &mut keywords);
            }
        }

        keywords.truncate(MAX_KEYWORDS);
        keywords
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new()
    }

    #[test]
    fn news_query_classified_as_news_inquiry() {
        let q = classifier().classify("삼성전자 관련 뉴스 보여줘");
        assert_eq!(q.intent, Intent::NewsInquiry);
        assert!(q.confidence > 0.0);
    }

    #[test]
    fn outlook_query_classified_as_stock_analysis() {
        let q = classifier().classify("에코프로 전망 어때?");
        assert_eq!(q.intent, Intent::StockAnalysis);
    }

    #[test]
    fn comparison_query_detected() {
        let q = classifier().classify("삼성전자와 SK하이닉스 비교");
        assert_eq!(q.intent, Intent::Comparison);
    }

    #[test]
    fn glossary_query_is_general_qa() {
        let q = classifier().classify("PER이 뭐야?");
        assert_eq!(q.intent, Intent::GeneralQa);
    }

    #[test]
    fn gibberish_is_unknown() {
        let q = classifier().classify("asdf qwer zxcv");
        assert_eq!(q.intent, Intent::Unknown);
        assert_eq!(q.confidence, 0.0);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        let a = c.classify("2차전지 유망주 추천해줘");
        let b = c.classify("2차전지 유망주 추천해줘");
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.keywords, b.keywords);
    }

    #[test]
    fn extracts_companies_and_sector() {
        let e = classifier().extract_entities("삼성전자와 SK하이닉스의 HBM 반도체 경쟁");
        assert!(e.companies.contains("삼성전자"));
        assert!(e.companies.contains("SK하이닉스"));
        assert!(e.products.contains("HBM"));
        assert!(e.sectors.contains("반도체"));
    }

    #[test]
    fn extracts_ticker_codes() {
        let e = classifier().extract_entities("005930 주가 알려줘");
        assert!(e.tickers.contains("005930"));
    }

    #[test]
    fn product_match_is_plain_string() {
        // Non-capturing groups: matches must come back as whole strings.
        let e = classifier().extract_entities("HBM3E와 DDR5 수요 증가");
        assert!(e.products.contains("HBM3E"));
        assert!(e.products.contains("DDR5"));
    }

    #[test]
    fn keywords_lead_with_entities_and_skip_stopwords() {
        let q = classifier().classify("삼성전자 관련 최근 수주 소식 알려줘");
        assert_eq!(q.keywords[0], "삼성전자");
        assert!(q.keywords.iter().any(|k| k == "수주"));
        assert!(!q.keywords.iter().any(|k| k == "관련"));
        assert!(!q.keywords.iter().any(|k| k == "알려줘"));
    }

    #[test]
    fn keywords_capped_at_fifteen() {
        let long_query = "삼성전자 SK하이닉스 현대차 기아 포스코 네이버 카카오 에코프로 \
                          반도체 배터리 방산 바이오 게임 조선 철강 화학 금융 수주 실적 매출";
        let q = classifier().classify(long_query);
        assert!(q.keywords.len() <= 15);
    }
}
