// tests/extract_strategies.rs
//
// Extraction against realistic page layouts, one per strategy.

use line_status::extract::Extractor;

const HEADING: &str = include_str!("fixtures/status_heading.html");
const LIST: &str = include_str!("fixtures/status_list.html");
const FULLTEXT: &str = include_str!("fixtures/status_fulltext.html");

fn numbers(ex: &line_status::extract::Extraction) -> Vec<&str> {
    ex.candidates.iter().map(|c| c.number.as_str()).collect()
}

#[test]
fn heading_layout_reads_status_from_labelled_container() {
    let ex = Extractor::default().extract(HEADING);
    assert_eq!(ex.strategy, Some("heading"));
    assert_eq!(numbers(&ex), vec!["1", "3"]);

    let l1 = &ex.candidates[0];
    assert_eq!(l1.color.as_deref(), Some("Azul"));
    assert_eq!(l1.raw_status.as_deref(), Some("Operação Normal"));
    assert_eq!(l1.station_count, Some(23));

    let l3 = &ex.candidates[1];
    assert_eq!(l3.raw_status.as_deref(), Some("Velocidade Reduzida"));
    assert_eq!(l3.updated_at.as_deref(), Some("15/01/2026 11:58"));
    assert_eq!(l3.station_count, None);
}

#[test]
fn duplicate_lines_keep_first_occurrence_every_time() {
    let extractor = Extractor::default();
    for _ in 0..5 {
        let ex = extractor.extract(HEADING);
        assert_eq!(ex.duplicates_dropped, 1);
        assert_eq!(ex.candidates[1].raw_status.as_deref(), Some("Velocidade Reduzida"));
    }
}

#[test]
fn list_layout_falls_back_to_list_items() {
    let ex = Extractor::default().extract(LIST);
    assert_eq!(ex.strategy, Some("list"));
    assert_eq!(numbers(&ex), vec!["4", "8", "12"]);
    assert_eq!(ex.candidates[0].raw_status.as_deref(), Some("Operação Normal"));
    assert_eq!(
        ex.candidates[1].raw_status.as_deref(),
        Some("Circulação de trens com maiores intervalos")
    );
    assert_eq!(ex.candidates[2].color.as_deref(), Some("Safira"));
    assert_eq!(ex.candidates[2].raw_status.as_deref(), Some("Paralisada"));
    assert_eq!(ex.candidates[2].updated_at.as_deref(), Some("10:20"));
}

#[test]
fn flat_text_is_the_last_resort() {
    let ex = Extractor::default().extract(FULLTEXT);
    assert_eq!(ex.strategy, Some("fulltext"));
    assert_eq!(numbers(&ex), vec!["1", "2", "5"]);
    let status: Vec<_> = ex
        .candidates
        .iter()
        .map(|c| c.raw_status.clone().unwrap_or_default())
        .collect();
    assert_eq!(status, vec!["Operação Normal", "Operação Encerrada", "Paralisada"]);
    assert_eq!(ex.candidates[2].color.as_deref(), Some("Lilás"));
}

#[test]
fn unrelated_page_yields_nothing() {
    let ex = Extractor::default().extract(
        "<html><body><h1>Em manutenção</h1><p>Voltamos em breve.</p></body></html>",
    );
    assert!(ex.is_empty());
    assert_eq!(ex.strategy, None);
}

#[test]
fn truncated_markup_does_not_abort() {
    let cut = &HEADING[..HEADING.find("Velocidade").unwrap_or(HEADING.len())];
    let ex = Extractor::default().extract(cut);
    assert_eq!(ex.candidates[0].number, "1");
    assert_eq!(ex.candidates[0].raw_status.as_deref(), Some("Operação Normal"));
}

#[test]
fn list_item_with_titled_first_column_uses_inline_reading() {
    let html = r#"<ul>
  <li><strong>Linha 9 Esmeralda</strong><span>Operação Normal</span><small>Atualizado às 09:10</small></li>
  <li><span>10</span><span>Turquesa</span><span>Velocidade Reduzida</span></li>
</ul>"#;
    let ex = Extractor::default().extract(html);
    assert_eq!(ex.strategy, Some("list"));
    assert_eq!(numbers(&ex), vec!["9", "10"]);
    assert_eq!(ex.candidates[0].color.as_deref(), Some("Esmeralda"));
    assert_eq!(ex.candidates[0].raw_status.as_deref(), Some("Operação Normal"));
    assert_eq!(ex.candidates[0].updated_at.as_deref(), Some("09:10"));
    assert_eq!(ex.candidates[1].raw_status.as_deref(), Some("Velocidade Reduzida"));
}

#[test]
fn json_feed_with_mixed_name_fields() {
    let ex = Extractor::default().extract(include_str!("fixtures/cptm_status.json"));
    assert_eq!(ex.strategy, Some("json"));
    assert_eq!(numbers(&ex), vec!["3", "7", "10", "11"]);
    assert_eq!(ex.candidates[1].color.as_deref(), Some("Rubi"));
    assert_eq!(ex.candidates[3].color, None);
    assert_eq!(ex.candidates[3].raw_status.as_deref(), Some("Paralisada"));

    let wrapped = r#"{ "linhas": [ { "id": 13, "status": "Operação Encerrada" } ] }"#;
    let ex = Extractor::default().extract(wrapped);
    assert_eq!(numbers(&ex), vec!["13"]);
    assert_eq!(ex.candidates[0].raw_status.as_deref(), Some("Operação Encerrada"));

    assert!(Extractor::default().extract("[1, 2").is_empty());
}
