// src/lines.rs
//! Static reference data for the São Paulo network.
//!
//! The upstream pages only carry number, color word and a status phrase; the
//! catalog fills in display name, operator, hex color and stations, and gives
//! the regex extraction strategy its color vocabulary.

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Metro,
    Cptm,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Metro => "metro",
            Operator::Cptm => "cptm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "metro" | "metrô" => Some(Operator::Metro),
            "cptm" => Some(Operator::Cptm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogLine {
    pub id: String,
    pub number: &'static str,
    pub color: &'static str,
    pub name: String,
    pub operator: Operator,
    pub color_hex: &'static str,
    pub stations: &'static [&'static str],
}

fn line(
    number: &'static str,
    color: &'static str,
    operator: Operator,
    color_hex: &'static str,
    stations: &'static [&'static str],
) -> CatalogLine {
    CatalogLine {
        id: slug(number, Some(color)),
        number,
        color,
        name: format!("Linha {number} - {color}"),
        operator,
        color_hex,
        stations,
    }
}

pub static CATALOG: Lazy<Vec<CatalogLine>> = Lazy::new(|| {
    use Operator::{Cptm, Metro};
    vec![
        line("1", "Azul", Metro, "#0455A1", &[
            "Jabaquara", "Conceição", "São Judas", "Saúde", "Praça da Árvore", "Santa Cruz",
            "Vila Mariana", "Ana Rosa", "Paraíso", "Vergueiro", "São Joaquim", "Liberdade", "Sé",
            "São Bento", "Luz", "Tiradentes", "Armênia", "Portuguesa-Tietê", "Carandiru",
            "Santana", "Jardim São Paulo-Ayrton Senna", "Parada Inglesa", "Tucuruvi",
        ]),
        line("2", "Verde", Metro, "#007E5E", &[
            "Vila Prudente", "Tamanduateí", "Sacomã", "Alto do Ipiranga", "Santos-Imigrantes",
            "Chácara Klabin", "Ana Rosa", "Paraíso", "Brigadeiro", "Trianon-Masp", "Consolação",
            "Clínicas", "Sumaré", "Vila Madalena",
        ]),
        line("3", "Vermelha", Metro, "#EE372F", &[
            "Palmeiras-Barra Funda", "Marechal Deodoro", "Santa Cecília", "República",
            "Anhangabaú", "Sé", "Pedro II", "Brás", "Bresser-Mooca", "Belém", "Tatuapé", "Carrão",
            "Penha", "Vila Matilde", "Guilhermina-Esperança", "Patriarca-Vila Ré", "Artur Alvim",
            "Corinthians-Itaquera",
        ]),
        line("4", "Amarela", Metro, "#FDD000", &[
            "Luz", "República", "Higienópolis-Mackenzie", "Paulista", "Faria Lima", "Pinheiros",
            "Butantã", "São Paulo-Morumbi", "Vila Sônia",
        ]),
        line("5", "Lilás", Metro, "#9B3894", &[
            "Capão Redondo", "Campo Limpo", "Vila das Belezas", "Giovanni Gronchi", "Santo Amaro",
            "Largo Treze", "Adolfo Pinheiro", "Alto da Boa Vista", "Borba Gato", "Brooklin",
            "Campo Belo", "Eucaliptos", "Moema", "AACD-Servidor", "Hospital São Paulo",
            "Santa Cruz", "Chácara Klabin",
        ]),
        line("7", "Rubi", Cptm, "#CA016B", &[
            "Luz", "Palmeiras-Barra Funda", "Água Branca", "Lapa", "Piqueri", "Pirituba",
            "Vila Clarice", "Jaraguá", "Perus", "Caieiras", "Franco da Rocha", "Baltazar Fidélis",
            "Francisco Morato", "Botujuru", "Campo Limpo Paulista", "Várzea Paulista", "Jundiaí",
        ]),
        line("8", "Diamante", Cptm, "#97A098", &[
            "Júlio Prestes", "Palmeiras-Barra Funda", "Lapa", "Domingos de Morais",
            "Imperatriz Leopoldina", "Presidente Altino", "Osasco", "Comandante Sampaio",
            "Quitaúna", "General Miguel Costa", "Carapicuíba", "Santa Terezinha", "Antônio João",
            "Barueri", "Jardim Belval", "Jardim Silveira", "Jandira", "Sagrado Coração",
            "Engenheiro Cardoso", "Itapevi", "Santa Rita", "Amador Bueno",
        ]),
        line("9", "Esmeralda", Cptm, "#01A9A7", &[
            "Osasco", "Presidente Altino", "Ceasa", "Villa-Lobos-Jaguaré", "Cidade Universitária",
            "Pinheiros", "Hebraica-Rebouças", "Cidade Jardim", "Vila Olímpia", "Berrini",
            "Morumbi", "Granja Julieta", "Santo Amaro", "Socorro", "Jurubatuba", "Autódromo",
            "Primavera-Interlagos", "Grajaú",
        ]),
        line("10", "Turquesa", Cptm, "#049FC3", &[
            "Brás", "Tatuapé", "Ipiranga", "Tamanduateí", "São Caetano do Sul", "Utinga",
            "Prefeito Saladino", "Prefeito Celso Daniel-Santo André", "Capuava", "Mauá",
            "Guapituba", "Ribeirão Pires", "Rio Grande da Serra",
        ]),
        line("11", "Coral", Cptm, "#F68368", &[
            "Luz", "Brás", "Tatuapé", "Corinthians-Itaquera", "Dom Bosco", "José Bonifácio",
            "Guaianases", "Antonio Gianetti Neto", "Ferraz de Vasconcelos", "Poá", "Calmon Viana",
            "Suzano", "Jundiapeba", "Braz Cubas", "Mogi das Cruzes", "Estudantes",
        ]),
        line("12", "Safira", Cptm, "#133C8D", &[
            "Brás", "Tatuapé", "Engenheiro Goulart", "USP Leste", "Comendador Ermelino",
            "São Miguel Paulista", "Jardim Helena-Vila Mara", "Itaim Paulista", "Jardim Romano",
            "Engenheiro Manuel Feio", "Itaquaquecetuba", "Aracaré", "Calmon Viana",
        ]),
        line("13", "Jade", Cptm, "#00AB4E", &["Engenheiro Goulart", "Aeroporto-Guarulhos"]),
        line("15", "Prata", Metro, "#A3A3A3", &[
            "Vila Prudente", "Oratório", "São Lucas", "Camilo Haddad", "Vila Tolstói",
            "Vila União", "Jardim Planalto", "Sapopemba", "Fazenda da Juta", "São Mateus",
            "Jardim Colonial",
        ]),
    ]
});

/// Strip Portuguese diacritics so "Lilás" and "Lilas" compare equal.
pub fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'ê' | 'è' => 'e',
            'É' | 'Ê' | 'È' => 'E',
            'í' | 'ì' => 'i',
            'Í' | 'Ì' => 'I',
            'ó' | 'ô' | 'õ' | 'ò' => 'o',
            'Ó' | 'Ô' | 'Õ' | 'Ò' => 'O',
            'ú' | 'ü' | 'ù' => 'u',
            'Ú' | 'Ü' | 'Ù' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

/// Stable line id, e.g. `linha-5-lilas`.
pub fn slug(number: &str, color: Option<&str>) -> String {
    let number = number.trim();
    match color.map(color_slug).filter(|c| !c.is_empty()) {
        Some(c) => format!("linha-{number}-{c}"),
        None => format!("linha-{number}"),
    }
}

pub fn color_slug(color: &str) -> String {
    fold_accents(color.trim())
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

pub fn by_number(number: &str) -> Option<&'static CatalogLine> {
    let n = number.trim().trim_start_matches('0');
    CATALOG.iter().find(|l| l.number == n)
}

pub fn by_id(id: &str) -> Option<&'static CatalogLine> {
    CATALOG.iter().find(|l| l.id.eq_ignore_ascii_case(id.trim()))
}

/// Resolve a free color word ("lilas", "Lilás", "ESMERALDA") to the catalog.
pub fn by_color(color: &str) -> Option<&'static CatalogLine> {
    let wanted = color_slug(color);
    CATALOG.iter().find(|l| color_slug(l.color) == wanted)
}

/// All known color words, with and without accents, for regex alternations.
pub fn color_words() -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for l in CATALOG.iter() {
        words.push(l.color.to_string());
        let folded = fold_accents(l.color);
        if folded != l.color {
            words.push(folded);
        }
    }
    words
}
