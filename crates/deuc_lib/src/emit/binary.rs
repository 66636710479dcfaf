use crate::DeucError;
use crate::node::FunctionNode;

/// Re-encodes a finished function. The result equals the bytes it was decoded from.
pub fn render_binary(func: &FunctionNode) -> Result<Vec<u8>, DeucError> {
    let mut out = Vec::new();
    for ins in super::stream(func)? {
        ins.encode(&mut out);
    }
    Ok(out)
}
