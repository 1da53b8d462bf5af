//! Open remote datasets.

use crate::client::proxy::{ArrayProxy, Connection, SequenceProxy};
use crate::constraint::parse_ce;
use crate::error::DapError;
use crate::evaluator::apply_constraint;
use crate::functions::FunctionRegistry;
use crate::model::{Container, DapNode, Dataset, SequenceData, VarData};
use crate::parsers::{add_attributes, parse_das, parse_dds};

/// Open a remote dataset.
///
/// The structure and attributes are fetched from `<url>.dds` and `<url>.das`; every variable
/// gets a lazy proxy instead of data. A constraint expression in the query string of `url`
/// is applied to the result, which only rewrites the proxies.
///
/// # Arguments
///
/// * `url`: URL of the dataset, optionally with a constraint expression
/// * `connection`: Connection used for metadata and data requests
#[tracing::instrument(level = "DEBUG", skip(connection))]
pub fn open_url(url: &str, connection: &Connection) -> Result<Dataset, DapError> {
    let (baseurl, query) = match url.split_once('?') {
        Some((baseurl, query)) => (baseurl, query),
        None => (url, ""),
    };
    url::Url::parse(baseurl)?;

    let dds = connection.fetch(&format!("{}.dds", baseurl))?.text()?;
    let das = connection.fetch(&format!("{}.das", baseurl))?.text()?;
    let mut dataset = parse_dds(&dds)?;
    add_attributes(&mut dataset, parse_das(&das)?);
    attach_proxies(&mut dataset, baseurl, connection);

    if query.is_empty() {
        return Ok(dataset);
    }
    let (projection, selection) = parse_ce(query)?;
    apply_constraint(&dataset, &projection, &selection, &FunctionRegistry::new())
}

/// Attach proxies to the variables of `container`.
///
/// Members of sequences are reached through the sequence's proxy and get none of their own.
fn attach_proxies(container: &mut Container, baseurl: &str, connection: &Connection) {
    for node in container.members_mut() {
        match node {
            DapNode::Base(var) => {
                let proxy = ArrayProxy::new(
                    baseurl,
                    var.id(),
                    var.dtype,
                    var.shape.clone(),
                    connection.clone(),
                );
                var.data = VarData::Remote(proxy);
            }
            DapNode::Sequence(seq) => {
                let proxy =
                    SequenceProxy::new(baseurl, seq.id(), &seq.container, connection.clone());
                seq.data = SequenceData::Remote(proxy);
            }
            node => {
                if let Some(inner) = node.container_mut() {
                    attach_proxies(inner, baseurl, connection);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::{render_das, render_dds};
    use crate::test_utils::{self, int, string, StaticFetcher};
    use crate::types::{AttrValue, DValue};

    use std::sync::Arc;

    const BASE: &str = "http://test/data";

    fn server(dataset: &Dataset, queries: &[&str]) -> Arc<StaticFetcher> {
        Arc::new(
            test_utils::serve_dods(BASE, dataset, queries)
                .respond(&format!("{}.dds", BASE), 200, render_dds(dataset))
                .respond(&format!("{}.das", BASE), 200, render_das(dataset)),
        )
    }

    #[test]
    fn open_attaches_proxies() {
        let mut source = test_utils::simple_dataset();
        source.attributes.insert("title", DValue::from("simple"));
        if let Some(node) = source.find_mut("s.x") {
            node.attributes_mut().insert("units", DValue::from("m"));
        }
        let fetcher = server(&source, &["a", "s.x"]);
        let dataset = open_url(BASE, &Connection::new(fetcher.clone())).unwrap();
        assert_eq!(
            vec!["http://test/data.dds", "http://test/data.das"],
            fetcher.requests()
        );
        assert_eq!(
            Some(&AttrValue::Scalar(DValue::from("simple"))),
            dataset.get_attribute("title")
        );
        assert_eq!(
            Some(&AttrValue::Scalar(DValue::from("m"))),
            dataset.find("s.x").unwrap().get_attribute("units")
        );
        match dataset.find("s.x").unwrap() {
            DapNode::Base(var) => {
                assert!(matches!(var.data, VarData::Remote(_)));
                assert_eq!(Some(vec![-1, 0, 1]), var.array().unwrap().elements::<i16>());
            }
            node => panic!("unexpected node {:?}", node),
        }
        match dataset.get("a").unwrap() {
            DapNode::Base(var) => {
                assert_eq!(Some(vec![0, 1, 2, 3, 4]), var.array().unwrap().elements::<i32>())
            }
            node => panic!("unexpected node {:?}", node),
        }
        assert_eq!(4, fetcher.requests().len());
    }

    #[test]
    fn open_with_constraint() {
        let source = test_utils::simple_dataset();
        let fetcher = server(&source, &["a[0:1:1]"]);
        let dataset = open_url(
            &format!("{}?a%5B0:1:1%5D", BASE),
            &Connection::new(fetcher.clone()),
        )
        .unwrap();
        assert_eq!(1, dataset.children().count());
        match dataset.get("a").unwrap() {
            DapNode::Base(var) => {
                assert_eq!(vec![2], var.shape);
                assert_eq!(Some(vec![0, 1]), var.array().unwrap().elements::<i32>());
            }
            node => panic!("unexpected node {:?}", node),
        }
        assert_eq!(
            Some(&"http://test/data.dods?a[0:1:1]".to_string()),
            fetcher.requests().last()
        );
    }

    #[test]
    fn open_sequence() {
        let source = test_utils::sequence_dataset();
        let fetcher = server(&source, &["cast.n,cast.label"]);
        let dataset = open_url(BASE, &Connection::new(fetcher)).unwrap();
        match dataset.get("cast").unwrap() {
            DapNode::Sequence(seq) => {
                assert!(matches!(seq.data, SequenceData::Remote(_)));
                assert_eq!(
                    vec![
                        vec![int(10), string("x")],
                        vec![int(20), string("y")],
                        vec![int(5), string("z")]
                    ],
                    seq.records().unwrap()
                );
            }
            node => panic!("unexpected node {:?}", node),
        }
    }

    #[test]
    fn open_invalid_url() {
        let fetcher = Arc::new(StaticFetcher::new(4));
        assert!(matches!(
            open_url("not a url", &Connection::new(fetcher.clone())).unwrap_err(),
            DapError::Url(_)
        ));
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn open_missing_dataset() {
        let fetcher = Arc::new(StaticFetcher::new(4));
        assert!(matches!(
            open_url(BASE, &Connection::new(fetcher)).unwrap_err(),
            DapError::Server { code: 1001, .. }
        ));
    }
}
