fn main() -> anyhow::Result<()> {
    initsvc::svc::main()
}
