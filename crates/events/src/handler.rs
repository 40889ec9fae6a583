/// Decide and evolve in one step, without persistence.
///
/// Calls `handle` and applies every returned event to the aggregate. Domain
/// tests use it to walk an aggregate through a scenario; production code goes
/// through the infrastructure unit of work instead.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: shopdesk_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
