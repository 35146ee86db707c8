use crate::attribute::{AttrEntry, ATTR_RESOURCE_LIST, ATTR_VARIABLE_LIST};
use crate::wire::dis::{DisError, DisReader, DisWriter};

/// Operator code for plain assignment.
pub const OP_SET: u32 = 0;

/// Byte length the entry header announces: each string plus its terminator.
fn entry_len(entry: &AttrEntry) -> u64 {
    let mut len = entry.name.len() + 1;
    if let Some(resource) = &entry.resource {
        len += resource.len() + 1;
    }
    len += entry.value.len() + 1;
    len as u64
}

fn write_entry(w: &mut DisWriter, entry: &AttrEntry) {
    w.write_uint(entry_len(entry));
    w.write_str(&entry.name);
    match &entry.resource {
        Some(resource) => {
            w.write_uint(1);
            w.write_str(resource);
        }
        None => w.write_uint(0),
    }
    w.write_str(&entry.value);
    w.write_uint(u64::from(entry.op));
}

/// Write `entries` as a counted attribute list. The count is written even
/// when the list is empty.
pub fn encode_attr_list(w: &mut DisWriter, entries: &[AttrEntry]) {
    w.write_uint(entries.len() as u64);
    for entry in entries {
        write_entry(w, entry);
    }
}

fn read_entry(r: &mut DisReader<'_>) -> Result<AttrEntry, DisError> {
    let _len = r.read_uint()?;
    let name = r.read_str()?;
    let resource = match r.read_uint()? {
        0 => None,
        _ => Some(r.read_str()?),
    };
    let value = r.read_str()?;
    let op = u32::try_from(r.read_uint()?).map_err(|_| DisError::Overflow)?;
    Ok(AttrEntry {
        name,
        resource,
        value,
        op,
    })
}

pub fn decode_attr_list(r: &mut DisReader<'_>) -> Result<Vec<AttrEntry>, DisError> {
    let count = r.read_uint()?;
    (0..count).map(|_| read_entry(r)).collect()
}

fn is_origin_var(name: &str) -> bool {
    name.starts_with("pbs_o") || name.starts_with("PBS_O")
}

/// Fold environment entries out of `attrs` into one `Variable_List` value.
///
/// `PBS_O*` entries contribute `NAME=value`; `pbs_var_NAME` entries
/// contribute `NAME=value`; an existing `Variable_List` entry contributes
/// its value verbatim. All of them are removed from `attrs`. Pieces are
/// joined with commas in the order they appear.
pub fn build_var_list(attrs: &mut Vec<AttrEntry>) -> String {
    let mut pieces = Vec::new();
    attrs.retain(|a| {
        if is_origin_var(&a.name) {
            pieces.push(format!("{}={}", a.name, a.value));
            false
        } else if let Some(var) = a.name.strip_prefix("pbs_var_") {
            pieces.push(format!("{}={}", var, a.value));
            false
        } else if a.name == ATTR_VARIABLE_LIST {
            pieces.push(a.value.clone());
            false
        } else {
            true
        }
    });
    pieces.join(",")
}

/// Encode a job's attributes for submission: the job's own attributes, then
/// `resources` (resource name to value) under `Resource_List`, then the
/// aggregated `Variable_List`.
pub fn encode_job_attrs(
    w: &mut DisWriter,
    job_attrs: &[AttrEntry],
    resources: &[(String, String)],
) {
    let mut attrs = job_attrs.to_vec();
    let var_list = build_var_list(&mut attrs);

    let mut entries = attrs;
    entries.extend(
        resources
            .iter()
            .map(|(name, value)| AttrEntry::with_resource(ATTR_RESOURCE_LIST, name, value)),
    );
    entries.push(AttrEntry {
        name: ATTR_VARIABLE_LIST.to_string(),
        resource: None,
        value: var_list,
        op: OP_SET,
    });
    encode_attr_list(w, &entries);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(w: DisWriter) -> String {
        String::from_utf8(w.into_bytes()).unwrap()
    }

    #[test]
    fn entry_framing() {
        let mut w = DisWriter::new();
        encode_attr_list(&mut w, &[AttrEntry::new("Job_Name", "sim")]);
        // len = 9 + 4, name, no resource, value, op
        assert_eq!(text(w), "+12+13+8Job_Name+0+3sim+0");
    }

    #[test]
    fn resource_entry_framing() {
        let mut w = DisWriter::new();
        encode_attr_list(
            &mut w,
            &[AttrEntry::with_resource("Resource_List", "walltime", "01:00:00")],
        );
        // 14 + 9 + 9 = 32
        assert_eq!(
            text(w),
            "+12+322+13Resource_List+1+8walltime+801:00:00+0"
        );
    }

    #[test]
    fn empty_list_still_has_count() {
        let mut w = DisWriter::new();
        encode_attr_list(&mut w, &[]);
        assert_eq!(text(w), "+0");
    }

    #[test]
    fn list_reads_back() {
        let entries = vec![
            AttrEntry::new("Priority", "10"),
            AttrEntry::with_resource("Resource_List", "mem", "1gb"),
            AttrEntry::new("comment", ""),
        ];
        let mut w = DisWriter::new();
        encode_attr_list(&mut w, &entries);
        let bytes = w.into_bytes();
        let decoded = decode_attr_list(&mut DisReader::new(&bytes)).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn var_list_aggregation() {
        let mut attrs = vec![
            AttrEntry::new("PBS_O_HOME", "/home/alice"),
            AttrEntry::new("Job_Name", "sim"),
            AttrEntry::new("pbs_var_FOO", "bar"),
            AttrEntry::new("Variable_List", "A=1,B=2"),
            AttrEntry::new("pbs_o_shell", "/bin/sh"),
        ];
        let var_list = build_var_list(&mut attrs);
        assert_eq!(
            var_list,
            "PBS_O_HOME=/home/alice,FOO=bar,A=1,B=2,pbs_o_shell=/bin/sh"
        );
        assert_eq!(attrs, vec![AttrEntry::new("Job_Name", "sim")]);
    }

    #[test]
    fn submission_counts_and_orders_entries() {
        let attrs = vec![
            AttrEntry::new("Job_Name", "sim"),
            AttrEntry::new("PBS_O_HOME", "/h"),
        ];
        let resources = vec![("ncpus".to_string(), "4".to_string())];
        let mut w = DisWriter::new();
        encode_job_attrs(&mut w, &attrs, &resources);
        let bytes = w.into_bytes();

        let decoded = decode_attr_list(&mut DisReader::new(&bytes)).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], AttrEntry::new("Job_Name", "sim"));
        assert_eq!(
            decoded[1],
            AttrEntry::with_resource("Resource_List", "ncpus", "4")
        );
        assert_eq!(decoded[2].name, "Variable_List");
        assert_eq!(decoded[2].value, "PBS_O_HOME=/h");
        assert_eq!(decoded[2].op, OP_SET);
    }
}
