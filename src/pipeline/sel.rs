//! SEL, the stream selector language.
//!
//! A closed little grammar over the stream set: attribute predicates combined
//! with `&`, `|`, `!` and parentheses, plus an optional trailing
//! `=> pin(top|bottom)` side channel consumed by the sorter.
//!
//! ```text
//! resolution(1080p) & service(rd) & !uncached() => pin(top)
//! group(SubsPlease) | seadex()
//! filename(/\bREMUX\b/) & quality(BluRay)
//! ```

use std::fmt::Display;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, multispace0};
use nom::combinator::{all_consuming, map, opt, value};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use regex::Regex;

use crate::stream::{ParsedStream, PinDirective};

#[derive(Debug)]
pub struct ExpressionError {
    pub expression: String,
    pub message: String,
}

impl Display for ExpressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid stream expression {:?}: {}", self.expression, self.message)
    }
}

impl std::error::Error for ExpressionError {}

/// A parsed SEL expression: the predicate tree plus an optional pin
/// directive.
#[derive(Debug, Clone)]
pub struct StreamExpression {
    pub source: String,
    node: Node,
    pub pin: Option<PinDirective>,
}

#[derive(Debug, Clone)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Predicate(Predicate),
}

#[derive(Debug, Clone)]
enum Predicate {
    Addon(String),
    Service(String),
    Group(String),
    Resolution(String),
    Quality(String),
    Indexer(String),
    Language(String),
    StreamType(String),
    Filename(Regex),
    Hash(String),
    Cached,
    Uncached,
    Library,
    Seadex,
    SeadexBest,
    SeasonPack,
}

impl StreamExpression {
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        let trimmed = input.trim();
        match all_consuming(expression).parse(trimmed) {
            Ok((_, (node, pin))) => Ok(Self {
                source: trimmed.to_owned(),
                node,
                pin,
            }),
            Err(e) => Err(ExpressionError {
                expression: trimmed.to_owned(),
                message: e.to_string(),
            }),
        }
    }

    pub fn matches(&self, stream: &ParsedStream) -> bool {
        eval(&self.node, stream)
    }
}

fn eval(node: &Node, stream: &ParsedStream) -> bool {
    match node {
        Node::And(nodes) => nodes.iter().all(|n| eval(n, stream)),
        Node::Or(nodes) => nodes.iter().any(|n| eval(n, stream)),
        Node::Not(inner) => !eval(inner, stream),
        Node::Predicate(p) => eval_predicate(p, stream),
    }
}

fn eq_ignore(value: &str, field: Option<&str>) -> bool {
    field.is_some_and(|f| f.eq_ignore_ascii_case(value))
}

fn eval_predicate(p: &Predicate, stream: &ParsedStream) -> bool {
    match p {
        Predicate::Addon(name) => stream.addon.eq_ignore_ascii_case(name),
        Predicate::Service(id) => stream
            .service
            .as_ref()
            .is_some_and(|s| s.id.eq_ignore_ascii_case(id)),
        Predicate::Group(name) => eq_ignore(
            name,
            stream
                .parsed_file
                .as_ref()
                .and_then(|p| p.release_group.as_deref()),
        ),
        Predicate::Resolution(res) => eq_ignore(
            res,
            stream
                .parsed_file
                .as_ref()
                .and_then(|p| p.resolution.as_deref()),
        ),
        Predicate::Quality(q) => eq_ignore(
            q,
            stream
                .parsed_file
                .as_ref()
                .and_then(|p| p.quality.as_deref()),
        ),
        Predicate::Indexer(name) => eq_ignore(name, stream.indexer.as_deref()),
        Predicate::Language(lang) => stream
            .languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(lang)),
        Predicate::StreamType(t) => stream.stream_type().as_str().eq_ignore_ascii_case(t),
        Predicate::Filename(regex) => stream
            .filename
            .as_deref()
            .or(stream.folder_name.as_deref())
            .is_some_and(|f| regex.is_match(f)),
        Predicate::Hash(hash) => stream
            .info_hash
            .as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(hash)),
        Predicate::Cached => stream.service.as_ref().is_some_and(|s| s.cached),
        Predicate::Uncached => stream.service.as_ref().is_some_and(|s| !s.cached),
        Predicate::Library => stream.service.as_ref().is_some_and(|s| s.library),
        Predicate::Seadex => stream.seadex.is_some_and(|t| t.is_seadex),
        Predicate::SeadexBest => stream.seadex.is_some_and(|t| t.is_best),
        Predicate::SeasonPack => stream
            .parsed_file
            .as_ref()
            .is_some_and(|p| p.is_season_pack()),
    }
}

// --- grammar ---

fn ws<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

fn expression(input: &str) -> IResult<&str, (Node, Option<PinDirective>)> {
    let (input, node) = or_expr(input)?;
    let (input, pin) = opt(preceded(ws(tag("=>")), pin_directive)).parse(input)?;
    Ok((input, (node, pin)))
}

fn pin_directive(input: &str) -> IResult<&str, PinDirective> {
    preceded(
        ws(tag("pin")),
        delimited(
            ws(char('(')),
            alt((
                value(PinDirective::Top, tag("top")),
                value(PinDirective::Bottom, tag("bottom")),
            )),
            ws(char(')')),
        ),
    )
    .parse(input)
}

fn or_expr(input: &str) -> IResult<&str, Node> {
    map(separated_list1(ws(char('|')), and_expr), |mut nodes| {
        if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Node::Or(nodes)
        }
    })
    .parse(input)
}

fn and_expr(input: &str) -> IResult<&str, Node> {
    map(separated_list1(ws(char('&')), unary), |mut nodes| {
        if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Node::And(nodes)
        }
    })
    .parse(input)
}

fn unary(input: &str) -> IResult<&str, Node> {
    alt((
        map(preceded(ws(char('!')), unary), |n| Node::Not(Box::new(n))),
        delimited(ws(char('(')), or_expr, ws(char(')'))),
        map(predicate, Node::Predicate),
    ))
    .parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

fn bare_argument(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !matches!(c, '(' | ')' | '/' | '&' | '|' | '!') && !c.is_whitespace())
        .parse(input)
}

fn regex_argument(input: &str) -> IResult<&str, &str> {
    delimited(char('/'), take_while1(|c| c != '/'), char('/')).parse(input)
}

fn predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, name) = ws(identifier).parse(input)?;
    let (input, _) = char('(').parse(input)?;
    let (input, regex_arg) = opt(ws(regex_argument)).parse(input)?;
    let (input, bare_arg) = if regex_arg.is_none() {
        opt(ws(bare_argument)).parse(input)?
    } else {
        (input, None)
    };
    let (input, _) = char(')').parse(input)?;

    let arg = bare_arg.map(str::to_owned);
    let fail = |_msg: &str| {
        nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
    };

    let predicate = match name {
        "filename" => {
            let pattern = regex_arg.or(bare_arg).ok_or_else(|| fail("pattern"))?;
            let regex = Regex::new(pattern).map_err(|_| fail("regex"))?;
            Predicate::Filename(regex)
        }
        "addon" => Predicate::Addon(arg.ok_or_else(|| fail("addon"))?),
        "service" => Predicate::Service(arg.ok_or_else(|| fail("service"))?),
        "group" => Predicate::Group(arg.ok_or_else(|| fail("group"))?),
        "resolution" => Predicate::Resolution(arg.ok_or_else(|| fail("resolution"))?),
        "quality" => Predicate::Quality(arg.ok_or_else(|| fail("quality"))?),
        "indexer" => Predicate::Indexer(arg.ok_or_else(|| fail("indexer"))?),
        "language" => Predicate::Language(arg.ok_or_else(|| fail("language"))?),
        "type" => Predicate::StreamType(arg.ok_or_else(|| fail("type"))?),
        "hash" => Predicate::Hash(arg.ok_or_else(|| fail("hash"))?),
        "cached" => Predicate::Cached,
        "uncached" => Predicate::Uncached,
        "library" => Predicate::Library,
        "seadex" => Predicate::Seadex,
        "seadexBest" | "seadex_best" => Predicate::SeadexBest,
        "seasonPack" | "season_pack" => Predicate::SeasonPack,
        _ => {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Verify,
            )))
        }
    };
    Ok((input, predicate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SeadexTag, ServiceInfo};

    fn stream() -> ParsedStream {
        ParsedStream {
            addon: "torrentio".into(),
            service: Some(ServiceInfo {
                id: "rd".into(),
                cached: true,
                library: false,
            }),
            parsed_file: Some(crate::parser::parse("Show.S01E01.1080p.BluRay.x265-FLUX.mkv")),
            filename: Some("Show.S01E01.1080p.BluRay.x265-FLUX.mkv".into()),
            info_hash: Some("aabbccdd".into()),
            seadex: Some(SeadexTag {
                is_best: true,
                is_seadex: true,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn predicates() {
        let s = stream();
        for (expr, expected) in [
            ("addon(torrentio)", true),
            ("addon(other)", false),
            ("service(rd)", true),
            ("resolution(1080p)", true),
            ("resolution(720p)", false),
            ("group(FLUX)", true),
            ("cached()", true),
            ("uncached()", false),
            ("seadex()", true),
            ("seadexBest()", true),
            ("hash(AABBCCDD)", true),
            ("quality(BluRay)", true),
        ] {
            let parsed = StreamExpression::parse(expr).unwrap();
            assert_eq!(parsed.matches(&s), expected, "expr: {expr}");
        }
    }

    #[test]
    fn combinators_and_precedence() {
        let s = stream();
        let expr = StreamExpression::parse("resolution(1080p) & service(rd) | uncached()").unwrap();
        assert!(expr.matches(&s));
        let expr = StreamExpression::parse("!(cached() & resolution(720p))").unwrap();
        assert!(expr.matches(&s));
        let expr = StreamExpression::parse("!cached()").unwrap();
        assert!(!expr.matches(&s));
    }

    #[test]
    fn filename_regex() {
        let s = stream();
        let expr = StreamExpression::parse(r"filename(/S01E\d+/)").unwrap();
        assert!(expr.matches(&s));
        let expr = StreamExpression::parse(r"filename(/REMUX/)").unwrap();
        assert!(!expr.matches(&s));
    }

    #[test]
    fn pin_side_channel() {
        let expr = StreamExpression::parse("seadexBest() => pin(top)").unwrap();
        assert_eq!(expr.pin, Some(PinDirective::Top));
        let expr = StreamExpression::parse("uncached() => pin(bottom)").unwrap();
        assert_eq!(expr.pin, Some(PinDirective::Bottom));
        let expr = StreamExpression::parse("uncached()").unwrap();
        assert_eq!(expr.pin, None);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(StreamExpression::parse("frobnicate(x)").is_err());
        assert!(StreamExpression::parse("cached(").is_err());
        assert!(StreamExpression::parse("cached() &&& uncached()").is_err());
        assert!(StreamExpression::parse("").is_err());
    }
}
