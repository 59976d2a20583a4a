use super::BencodeValue;

pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn write_value(value: &BencodeValue, out: &mut Vec<u8>) {
    match value {
        BencodeValue::Integer(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        BencodeValue::String(s) => write_bytes(s, out),
        BencodeValue::List(items) => {
            out.push(b'l');
            items.iter().for_each(|item| write_value(item, out));
            out.push(b'e');
        }
        // BTreeMap iteration already yields the sorted key order bencode requires
        BencodeValue::Dict(entries) => {
            out.push(b'd');
            for (key, item) in entries {
                write_bytes(key, out);
                write_value(item, out);
            }
            out.push(b'e');
        }
    }
}
