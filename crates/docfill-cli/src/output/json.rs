use docfill_core::DocfillError;
use serde::Serialize;

pub fn print<T: Serialize>(value: &T) -> Result<(), DocfillError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
