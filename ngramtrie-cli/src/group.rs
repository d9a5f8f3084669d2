//! Parses `--group` specs: comma-separated `key=value` pairs describing
//! one language's training file.

use std::path::PathBuf;

use anyhow::{anyhow, Result};

/// One `--group` entry: `lang=XX,encoding=YY,path=FILE[,region=RR,script=SS]`.
#[derive(Debug, Clone)]
pub struct FileGroup {
    pub lang: String,
    pub encoding: String,
    pub path: PathBuf,
    pub region: Option<String>,
    pub script: Option<String>,
}

impl FileGroup {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut lang = None;
        let mut encoding = None;
        let mut path = None;
        let mut region = None;
        let mut script = None;

        for field in spec.split(',') {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed field {field:?} in group spec {spec:?}"))?;
            match key {
                "lang" => lang = Some(value.to_string()),
                "encoding" => encoding = Some(value.to_string()),
                "path" => path = Some(PathBuf::from(value)),
                "region" => region = Some(value.to_string()),
                "script" => script = Some(value.to_string()),
                other => return Err(anyhow!("unknown group field {other:?} in {spec:?}")),
            }
        }

        Ok(FileGroup {
            lang: lang.ok_or_else(|| anyhow!("group spec {spec:?} missing lang="))?,
            encoding: encoding.unwrap_or_else(|| "utf8".to_string()),
            path: path.ok_or_else(|| anyhow!("group spec {spec:?} missing path="))?,
            region,
            script,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_spec() {
        let g = FileGroup::parse("lang=en,path=/tmp/en.txt").unwrap();
        assert_eq!(g.lang, "en");
        assert_eq!(g.path, PathBuf::from("/tmp/en.txt"));
        assert_eq!(g.encoding, "utf8");
        assert!(g.region.is_none());
    }

    #[test]
    fn parses_full_spec() {
        let g = FileGroup::parse("lang=zh,encoding=gbk,region=CN,script=Hans,path=/tmp/zh.txt").unwrap();
        assert_eq!(g.lang, "zh");
        assert_eq!(g.encoding, "gbk");
        assert_eq!(g.region.as_deref(), Some("CN"));
        assert_eq!(g.script.as_deref(), Some("Hans"));
    }

    #[test]
    fn rejects_missing_lang() {
        assert!(FileGroup::parse("path=/tmp/x.txt").is_err());
    }

    #[test]
    fn rejects_unknown_field() {
        assert!(FileGroup::parse("lang=en,path=/tmp/x.txt,bogus=1").is_err());
    }
}
