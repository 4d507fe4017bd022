//! Data loading for CoNLL-U treebank files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A single training sentence: words with their gold head positions,
/// relation labels, and morphological tag descriptors.
#[derive(Debug, Clone)]
pub struct Sentence {
    pub words: Vec<String>,
    /// Gold head position per word; 0 is the virtual root.
    pub heads: Vec<usize>,
    pub deprels: Vec<String>,
    /// `POS,Key=Val|Key=Val` descriptors, one per word.
    pub tags: Vec<String>,
}

impl Sentence {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Load a treebank from a CoNLL-U file. Multiword token ranges (`1-2`)
/// and empty nodes (`1.1`) are skipped; sentences with missing head
/// annotation are dropped.
pub fn load_conllu<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<Sentence>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut sentences = Vec::new();
    let mut current = blank_sentence();
    let mut skip_current = false;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();

        if line.is_empty() {
            if !current.is_empty() && !skip_current {
                sentences.push(std::mem::replace(&mut current, blank_sentence()));
            } else {
                current = blank_sentence();
            }
            skip_current = false;
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() != 10 {
            continue;
        }
        if cols[0].contains('-') || cols[0].contains('.') {
            continue;
        }

        let head = match cols[6].parse::<usize>() {
            Ok(h) => h,
            Err(_) => {
                skip_current = true;
                continue;
            }
        };

        current.words.push(cols[1].to_string());
        current.heads.push(head);
        current.deprels.push(cols[7].to_string());
        current.tags.push(tag_descriptor(cols[3], cols[5]));
    }

    // Don't forget the last sentence
    if !current.is_empty() && !skip_current {
        sentences.push(current);
    }

    Ok(sentences)
}

fn blank_sentence() -> Sentence {
    Sentence {
        words: Vec::new(),
        heads: Vec::new(),
        deprels: Vec::new(),
        tags: Vec::new(),
    }
}

/// Combine the UPOS and FEATS columns into one descriptor string.
fn tag_descriptor(upos: &str, feats: &str) -> String {
    if feats == "_" {
        upos.to_string()
    } else {
        format!("{upos},{feats}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
# sent_id = 1
# text = The dog barks
1\tThe\tthe\tDET\tDT\tDefinite=Def\t2\tdet\t_\t_
2\tdog\tdog\tNOUN\tNN\tNumber=Sing\t3\tnsubj\t_\t_
3\tbarks\tbark\tVERB\tVBZ\t_\t0\troot\t_\t_

1-2\tcannot\t_\t_\t_\t_\t_\t_\t_\t_
1\tcan\tcan\tAUX\tMD\t_\t0\troot\t_\t_
2\tnot\tnot\tPART\tRB\t_\t1\tadvmod\t_\t_
";

    fn write_sample() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("kizuna-conllu-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.conllu");
        let mut file = File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_sentences() {
        let sentences = load_conllu(write_sample()).unwrap();
        assert_eq!(sentences.len(), 2);

        let first = &sentences[0];
        assert_eq!(first.words, vec!["The", "dog", "barks"]);
        assert_eq!(first.heads, vec![2, 3, 0]);
        assert_eq!(first.deprels, vec!["det", "nsubj", "root"]);
        assert_eq!(first.tags[0], "DET,Definite=Def");
        assert_eq!(first.tags[2], "VERB");
    }

    #[test]
    fn test_range_lines_skipped() {
        let sentences = load_conllu(write_sample()).unwrap();
        let second = &sentences[1];
        assert_eq!(second.words, vec!["can", "not"]);
        assert_eq!(second.heads, vec![0, 1]);
    }
}
