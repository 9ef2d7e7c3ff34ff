use state_machines::state_machine;

state_machine! {
    name: ImportMachine,
    state: ImportState,
    initial: Ready,
    states: [Ready, Unpacked, RequestsBuilt, Staged, Submitted],
    events {
        unpack { transition: { from: Ready, to: Unpacked } }
        build { transition: { from: Unpacked, to: RequestsBuilt } }
        stage { transition: { from: RequestsBuilt, to: Staged } }
        submit { transition: { from: Staged, to: Submitted } }
    }
}

pub fn ready() -> ImportMachine<(), Ready> {
    ImportMachine::new(())
}
